//! Built-in commands and their dispatch table.
//!
//! Builtins are a closed enum rather than a dynamic registry, so "not a
//! builtin" and "dispatch failed" can never be confused. Argument
//! handling for the structured builtins goes through [`argh`]'s
//! `FromArgs`, with usage errors printed and mapped to exit code 1
//! instead of aborting the shell; `echo` and `history` deliberately stay
//! permissive and take their arguments verbatim.

use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};

use argh::{EarlyExit, FromArgs};

use crate::error::ShellError;
use crate::external::CommandIndex;

pub type ExitCode = i32;

/// State a builtin may need beyond its own arguments: the external
/// command index (for `type`) and a read-only view of the line history.
pub struct ShellContext<'a> {
    pub index: &'a mut CommandIndex,
    pub history: &'a [String],
}

/// The fixed builtin vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Echo,
    Exit,
    Type,
    Pwd,
    Cd,
    History,
}

#[derive(FromArgs)]
/// Terminate the shell with the given status code.
struct ExitArgs {
    /// exit status; without one the command is a no-op failure
    #[argh(positional)]
    code: Option<i32>,
}

#[derive(FromArgs)]
/// Report how a command name would be resolved.
struct TypeArgs {
    /// command name to look up
    #[argh(positional)]
    name: String,
}

#[derive(FromArgs)]
/// Change the current working directory. Defaults to $HOME.
struct CdArgs {
    /// target directory; `~` and `~/...` expand to $HOME
    #[argh(positional)]
    target: Option<String>,
}

impl Builtin {
    pub const NAMES: [&'static str; 6] = ["echo", "exit", "type", "pwd", "cd", "history"];

    /// Maps a stage's first token to a builtin, if it names one.
    pub fn lookup(name: &str) -> Option<Builtin> {
        match name {
            "echo" => Some(Builtin::Echo),
            "exit" => Some(Builtin::Exit),
            "type" => Some(Builtin::Type),
            "pwd" => Some(Builtin::Pwd),
            "cd" => Some(Builtin::Cd),
            "history" => Some(Builtin::History),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Echo => "echo",
            Builtin::Exit => "exit",
            Builtin::Type => "type",
            Builtin::Pwd => "pwd",
            Builtin::Cd => "cd",
            Builtin::History => "history",
        }
    }

    /// Executes the builtin with the stage's arguments (argv minus the
    /// command name), writing regular output to `out`.
    pub fn run(
        self,
        args: &[String],
        out: &mut dyn Write,
        ctx: &mut ShellContext,
    ) -> Result<ExitCode, ShellError> {
        match self {
            Builtin::Echo => run_echo(args, out),
            Builtin::Exit => match parse::<ExitArgs>(self.name(), args, out)? {
                Ok(exit) => run_exit(exit),
                Err(code) => Ok(code),
            },
            Builtin::Type => match parse::<TypeArgs>(self.name(), args, out)? {
                Ok(type_args) => run_type(&type_args.name, out, ctx),
                Err(code) => Ok(code),
            },
            Builtin::Pwd => run_pwd(out),
            Builtin::Cd => match parse::<CdArgs>(self.name(), args, out)? {
                Ok(cd) => run_cd(cd.target.as_deref()),
                Err(code) => Ok(code),
            },
            Builtin::History => run_history(args, out, ctx),
        }
    }
}

/// Runs an argh parser over the raw arguments. A usage error prints
/// argh's message and yields the exit code to return instead.
fn parse<T: FromArgs>(
    name: &str,
    args: &[String],
    out: &mut dyn Write,
) -> Result<Result<T, ExitCode>, ShellError> {
    let refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
    match T::from_args(&[name], &refs) {
        Ok(parsed) => Ok(Ok(parsed)),
        Err(EarlyExit { output, status }) => {
            if status.is_err() {
                eprintln!("{}", output.trim_end());
                Ok(Err(1))
            } else {
                writeln!(out, "{}", output.trim_end())?;
                Ok(Err(0))
            }
        }
    }
}

fn run_echo(args: &[String], out: &mut dyn Write) -> Result<ExitCode, ShellError> {
    writeln!(out, "{}", args.join(" "))?;
    Ok(0)
}

fn run_exit(exit: ExitArgs) -> Result<ExitCode, ShellError> {
    match exit.code {
        Some(code) => std::process::exit(code),
        // No code given: refuse to exit rather than guess a status.
        None => Ok(1),
    }
}

fn run_type(
    name: &str,
    out: &mut dyn Write,
    ctx: &mut ShellContext,
) -> Result<ExitCode, ShellError> {
    if Builtin::lookup(name).is_some() {
        writeln!(out, "{name} is a shell builtin")?;
        return Ok(0);
    }
    match ctx.index.resolve(name) {
        Some(path) => {
            writeln!(out, "{} is {}", name, path.display())?;
            Ok(0)
        }
        None => {
            writeln!(out, "{name}: not found")?;
            Ok(1)
        }
    }
}

fn run_pwd(out: &mut dyn Write) -> Result<ExitCode, ShellError> {
    let cwd = env::current_dir()?;
    writeln!(out, "{}", cwd.display())?;
    Ok(0)
}

fn run_cd(target: Option<&str>) -> Result<ExitCode, ShellError> {
    let requested = match target {
        Some(path) if !path.is_empty() => path.to_string(),
        _ => env::var("HOME").map_err(|_| ShellError::HomeNotSet)?,
    };
    let expanded = expand_tilde(&requested)?;
    let absolute = std::path::absolute(&expanded)
        .map_err(|_| ShellError::CdTargetInvalid(requested.clone()))?;
    if !absolute.is_dir() {
        return Err(ShellError::CdTargetInvalid(requested));
    }
    env::set_current_dir(&absolute).map_err(|_| ShellError::CdTargetInvalid(requested))?;
    Ok(0)
}

fn expand_tilde(path: &str) -> Result<PathBuf, ShellError> {
    if path == "~" {
        return env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| ShellError::HomeNotSet);
    }
    if let Some(rest) = path.strip_prefix("~/") {
        let home = env::var("HOME").map_err(|_| ShellError::HomeNotSet)?;
        return Ok(Path::new(&home).join(rest));
    }
    Ok(PathBuf::from(path))
}

fn run_history(
    args: &[String],
    out: &mut dyn Write,
    ctx: &mut ShellContext,
) -> Result<ExitCode, ShellError> {
    let total = ctx.history.len();
    // A missing, non-numeric or out-of-range count means "show all".
    let limit = args
        .first()
        .and_then(|arg| arg.parse::<usize>().ok())
        .filter(|n| *n <= total)
        .unwrap_or(total);
    for (i, entry) in ctx.history.iter().enumerate().skip(total - limit) {
        writeln!(out, "{}  {}", i + 1, entry)?;
    }
    Ok(0)
}
