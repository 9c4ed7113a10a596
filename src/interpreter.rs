//! The interactive read-eval loop.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{CompletionType, Config, Editor};

use crate::completion::ShellHelper;
use crate::executor::Executor;
use crate::external::CommandIndex;
use crate::parser;

pub(crate) const PROMPT: &str = "$ ";

/// Owns the line editor and the session state (command index and
/// history) and runs the prompt loop until end of input.
pub struct Interpreter {
    editor: Editor<ShellHelper, DefaultHistory>,
    executor: Executor,
    history: Rc<RefCell<Vec<String>>>,
}

impl Interpreter {
    pub fn new() -> Result<Self> {
        let index = Rc::new(RefCell::new(CommandIndex::scan()));
        let history = Rc::new(RefCell::new(Vec::new()));

        let config = Config::builder()
            .completion_type(CompletionType::List)
            .build();
        let mut editor: Editor<ShellHelper, DefaultHistory> = Editor::with_config(config)?;
        editor.set_helper(Some(ShellHelper::new(Rc::clone(&index))));

        Ok(Interpreter {
            editor,
            executor: Executor::new(index, Rc::clone(&history)),
            history,
        })
    }

    /// Prompts, reads, parses and runs lines until EOF. Ctrl-C cancels
    /// the current line only; errors are printed and the loop goes on.
    pub fn repl(&mut self) -> Result<()> {
        loop {
            match self.editor.readline(PROMPT) {
                Ok(line) => {
                    if line.is_empty() {
                        continue;
                    }
                    self.editor.add_history_entry(line.as_str())?;
                    // Mirror of the editor history that `history` and
                    // pipeline children can read without the editor.
                    self.history.borrow_mut().push(line.clone());

                    let stages = parser::parse_line(&line);
                    if let Err(err) = self.executor.run(&stages) {
                        eprintln!("{err}");
                    }
                }
                Err(ReadlineError::Interrupted) => continue,
                Err(ReadlineError::Eof) => break,
                Err(err) => return Err(err.into()),
            }
        }
        println!();
        Ok(())
    }
}
