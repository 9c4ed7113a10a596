//! Pipeline parsing and redirection extraction.
//!
//! A raw line is first split on unquoted `|` into stage substrings, each
//! of which is tokenized by the lexer and then scanned for redirection
//! operators. The result is a sequence of [`Stage`]s ready for the
//! orchestrator.

use crate::lexer;

/// Which standard stream a redirection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirStream {
    Stdout,
    Stderr,
}

/// Whether a redirection truncates the target file or appends to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirMode {
    Truncate,
    Append,
}

/// A request to route one of a stage's output streams into a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    pub stream: RedirStream,
    pub mode: RedirMode,
    pub path: String,
}

/// One element of a pipeline: an argument vector plus the redirections
/// that were stripped out of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub argv: Vec<String>,
    pub redirections: Vec<Redirection>,
}

/// Splits a raw line on `|` characters that are outside quotes.
///
/// This layer only tracks quote state; escape handling is left to the
/// lexer. The substrings keep their original text, quotes and spacing
/// included, so each one can be tokenized independently.
pub fn split_pipeline(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut part = String::new();
    let mut in_single = false;
    let mut in_double = false;
    for c in input.chars() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '|' if !in_single && !in_double => {
                parts.push(std::mem::take(&mut part));
                continue;
            }
            _ => {}
        }
        part.push(c);
    }
    if !part.is_empty() {
        parts.push(part);
    }
    parts
}

fn redirection_operator(token: &str) -> Option<(RedirStream, RedirMode)> {
    match token {
        ">" | "1>" => Some((RedirStream::Stdout, RedirMode::Truncate)),
        ">>" | "1>>" => Some((RedirStream::Stdout, RedirMode::Append)),
        "2>" => Some((RedirStream::Stderr, RedirMode::Truncate)),
        "2>>" => Some((RedirStream::Stderr, RedirMode::Append)),
        _ => None,
    }
}

/// Scans a token sequence left to right, pulling out redirection
/// operators and their path tokens.
///
/// An operator must be a standalone token immediately followed by a path
/// token; a trailing operator with nothing after it stays in argv. When
/// the same stream is redirected twice, the later redirection replaces
/// the earlier one.
pub fn extract_redirections(tokens: Vec<String>) -> (Vec<String>, Vec<Redirection>) {
    let mut argv = Vec::new();
    let mut redirections: Vec<Redirection> = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        match redirection_operator(&token) {
            Some((stream, mode)) if iter.peek().is_some() => {
                let path = iter.next().unwrap();
                redirections.retain(|r| r.stream != stream);
                redirections.push(Redirection { stream, mode, path });
            }
            _ => argv.push(token),
        }
    }
    (argv, redirections)
}

/// Parses a raw line into pipeline stages.
///
/// Stages with an empty argv are kept; the orchestrator treats them as
/// no-ops rather than reporting a parse error.
pub fn parse_line(input: &str) -> Vec<Stage> {
    split_pipeline(input)
        .iter()
        .map(|part| {
            let (argv, redirections) = extract_redirections(lexer::tokenize(part));
            Stage { argv, redirections }
        })
        .collect()
}
