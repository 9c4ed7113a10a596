//! Interactive command-name completion.
//!
//! The engine itself is pure: it takes an explicit [`CompletionContext`]
//! on every call and returns what the caller should do, so the
//! press-twice protocol can be tested without a terminal. The
//! [`ShellHelper`] at the bottom adapts the engine to `rustyline`.
//!
//! Protocol: one candidate is inserted outright; with two or more, the
//! first request at a given prefix only rings the bell and subsequent
//! requests at the same prefix print the sorted candidate list below the
//! prompt.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::io::Write;
use std::rc::Rc;

use rustyline::Helper;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;

use crate::builtin::Builtin;
use crate::external::CommandIndex;
use crate::interpreter::PROMPT;

/// Per-line completion state: the prefix of the previous request and how
/// many times completion was invoked on it unchanged.
#[derive(Debug, Default)]
pub struct CompletionContext {
    last_prefix: String,
    presses: u32,
}

impl CompletionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// What the caller should do with a completion request.
#[derive(Debug, PartialEq, Eq)]
pub enum Completion {
    /// No candidate matched; do nothing.
    NoMatch,
    /// Exactly one candidate; insert it.
    Insert(String),
    /// Several candidates, first press: alert only, list nothing.
    Bell,
    /// Several candidates, repeated press: show the sorted list.
    Listing(Vec<String>),
}

/// Completes `prefix` against the builtin vocabulary and the command
/// index snapshot.
///
/// Candidates are case-sensitive prefix matches, deduplicated, sorted,
/// and never include the prefix itself.
pub fn complete(
    ctx: &mut CompletionContext,
    prefix: &str,
    index: &CommandIndex,
) -> Completion {
    if prefix != ctx.last_prefix {
        ctx.last_prefix = prefix.to_string();
        ctx.presses = 0;
    }

    let mut candidates: BTreeSet<&str> = BTreeSet::new();
    for name in Builtin::NAMES {
        if name.starts_with(prefix) && name != prefix {
            candidates.insert(name);
        }
    }
    for name in index.names() {
        if name.starts_with(prefix) && name != prefix {
            candidates.insert(name);
        }
    }

    // Only a prefix change resets the press count; unambiguous results
    // leave the state untouched.
    match candidates.len() {
        0 => Completion::NoMatch,
        1 => {
            let only = candidates.into_iter().next().unwrap();
            Completion::Insert(only.to_string())
        }
        _ => {
            ctx.presses += 1;
            if ctx.presses == 1 {
                Completion::Bell
            } else {
                Completion::Listing(candidates.into_iter().map(str::to_string).collect())
            }
        }
    }
}

/// rustyline glue: feeds completion requests into the engine and renders
/// its verdict on the terminal.
pub struct ShellHelper {
    index: Rc<RefCell<CommandIndex>>,
    state: RefCell<CompletionContext>,
}

impl ShellHelper {
    pub fn new(index: Rc<RefCell<CommandIndex>>) -> Self {
        ShellHelper {
            index,
            state: RefCell::new(CompletionContext::new()),
        }
    }
}

impl Completer for ShellHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = line[..pos]
            .rfind(char::is_whitespace)
            .map(|i| i + 1)
            .unwrap_or(0);
        let prefix = &line[start..pos];

        let verdict = {
            let index = self.index.borrow();
            let mut state = self.state.borrow_mut();
            complete(&mut state, prefix, &index)
        };

        let mut stdout = std::io::stdout();
        match verdict {
            Completion::Insert(name) => Ok((
                start,
                vec![Pair {
                    display: name.clone(),
                    replacement: format!("{name} "),
                }],
            )),
            Completion::Bell => {
                let _ = write!(stdout, "\x07");
                let _ = stdout.flush();
                Ok((start, Vec::new()))
            }
            Completion::Listing(names) => {
                // The editor is in raw mode here, hence explicit \r\n and
                // a manual redraw of the prompt line.
                let _ = write!(stdout, "\r\n{}\r\n{}{}", names.join("  "), PROMPT, line);
                let _ = stdout.flush();
                Ok((start, Vec::new()))
            }
            Completion::NoMatch => Ok((start, Vec::new())),
        }
    }
}

impl Hinter for ShellHelper {
    type Hint = String;

    fn hint(&self, _line: &str, _pos: usize, _ctx: &rustyline::Context<'_>) -> Option<String> {
        None
    }
}

impl Highlighter for ShellHelper {}
impl Validator for ShellHelper {}
impl Helper for ShellHelper {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::path::Path;

    #[cfg(unix)]
    fn fake_bin(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        File::create(&path).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    #[test]
    fn single_candidate_is_inserted() {
        let index = CommandIndex::default();
        let mut ctx = CompletionContext::new();
        assert_eq!(
            complete(&mut ctx, "ech", &index),
            Completion::Insert("echo".into())
        );
    }

    #[test]
    fn no_candidates_is_a_no_match() {
        let index = CommandIndex::default();
        let mut ctx = CompletionContext::new();
        assert_eq!(complete(&mut ctx, "zzz", &index), Completion::NoMatch);
    }

    #[test]
    fn candidate_equal_to_prefix_is_excluded() {
        let index = CommandIndex::default();
        let mut ctx = CompletionContext::new();
        // "echo" matches only itself among the builtins.
        assert_eq!(complete(&mut ctx, "echo", &index), Completion::NoMatch);
    }

    #[test]
    fn press_twice_protocol() {
        let index = CommandIndex::default();
        let mut ctx = CompletionContext::new();
        // "e" matches echo and exit.
        assert_eq!(complete(&mut ctx, "e", &index), Completion::Bell);
        assert_eq!(
            complete(&mut ctx, "e", &index),
            Completion::Listing(vec!["echo".into(), "exit".into()])
        );
        // Further presses keep listing.
        assert_eq!(
            complete(&mut ctx, "e", &index),
            Completion::Listing(vec!["echo".into(), "exit".into()])
        );
    }

    #[test]
    fn prefix_change_resets_the_press_count() {
        let index = CommandIndex::default();
        let mut ctx = CompletionContext::new();
        assert_eq!(complete(&mut ctx, "e", &index), Completion::Bell);
        assert_eq!(
            complete(&mut ctx, "ec", &index),
            Completion::Insert("echo".into())
        );
        // Back at an ambiguous prefix the protocol starts over.
        assert_eq!(complete(&mut ctx, "e", &index), Completion::Bell);
    }

    #[test]
    fn unmatched_prefix_restarts_the_protocol_on_return() {
        let index = CommandIndex::default();
        let mut ctx = CompletionContext::new();
        assert_eq!(complete(&mut ctx, "e", &index), Completion::Bell);
        // A detour through a prefix with no candidates counts as a
        // prefix change, nothing more.
        assert_eq!(complete(&mut ctx, "zzz", &index), Completion::NoMatch);
        assert_eq!(complete(&mut ctx, "zzz", &index), Completion::NoMatch);
        assert_eq!(complete(&mut ctx, "e", &index), Completion::Bell);
    }

    #[test]
    #[cfg(unix)]
    fn path_names_are_merged_deduplicated_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        // "echo" collides with the builtin, "eject" is new.
        fake_bin(dir.path(), "echo");
        fake_bin(dir.path(), "eject");
        let index = CommandIndex::scan_dirs([dir.path()]);

        let mut ctx = CompletionContext::new();
        assert_eq!(complete(&mut ctx, "e", &index), Completion::Bell);
        assert_eq!(
            complete(&mut ctx, "e", &index),
            Completion::Listing(vec!["echo".into(), "eject".into(), "exit".into()])
        );
    }
}
