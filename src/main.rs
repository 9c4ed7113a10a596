use anyhow::Result;

use minish::Interpreter;

fn main() -> Result<()> {
    Interpreter::new()?.repl()
}
