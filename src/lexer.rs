//! Lexical analysis of a single command line.
//!
//! The lexer runs a three-state machine (unquoted, single-quoted,
//! double-quoted) over the raw input and produces the argument words of
//! one pipeline stage. Quote characters themselves never appear in the
//! output; escaping follows POSIX-ish rules: a backslash outside quotes
//! takes the next character literally, inside double quotes it escapes
//! only `\\`, `"`, `$` and newline, and inside single quotes nothing is
//! special.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    Unquoted,
    InSingleQuote,
    InDoubleQuote,
}

struct LexerFsm {
    input: Vec<char>,
    pos: usize,
    state: QuoteState,
    token: String,
    tokens: Vec<String>,
}

impl LexerFsm {
    fn new(input: &str) -> Self {
        LexerFsm {
            input: input.chars().collect(),
            pos: 0,
            state: QuoteState::Unquoted,
            token: String::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<String> {
        while let Some(ch) = self.read_char() {
            match self.state {
                QuoteState::Unquoted => self.handle_unquoted(ch),
                QuoteState::InSingleQuote => self.handle_single_quote(ch),
                QuoteState::InDoubleQuote => self.handle_double_quote(ch),
            }
        }
        // An unterminated quote is accepted and simply closes the final
        // token. Empty tokens are never emitted.
        if !self.token.is_empty() {
            self.tokens.push(std::mem::take(&mut self.token));
        }
        self.tokens
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn handle_unquoted(&mut self, ch: char) {
        match ch {
            '\'' => self.state = QuoteState::InSingleQuote,
            '"' => self.state = QuoteState::InDoubleQuote,
            c if c.is_whitespace() => {
                if !self.token.is_empty() {
                    self.tokens.push(std::mem::take(&mut self.token));
                }
            }
            '\\' => {
                // The next character is taken literally, whitespace
                // included. A trailing backslash is dropped.
                if let Some(next) = self.read_char() {
                    self.token.push(next);
                }
            }
            c => self.token.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = QuoteState::Unquoted,
            c => self.token.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = QuoteState::Unquoted,
            '\\' => match self.input.get(self.pos).copied() {
                Some(next @ ('\\' | '"' | '$' | '\n')) => {
                    self.token.push(next);
                    self.pos += 1;
                }
                // Any other sequence keeps the backslash literally.
                _ => self.token.push('\\'),
            },
            c => self.token.push(c),
        }
    }
}

/// Splits a raw stage string into its argument words.
///
/// Empty input yields an empty vector.
pub fn tokenize(input: &str) -> Vec<String> {
    LexerFsm::new(input).run()
}
