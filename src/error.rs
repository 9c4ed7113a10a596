//! User-facing error taxonomy.
//!
//! Every variant renders the message the read-eval loop prints to
//! stderr. None of these abort the shell; the loop reports them and
//! reads the next line.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShellError {
    /// The first token of a stage resolved to neither a builtin nor an
    /// executable on PATH.
    #[error("{0}: command not found")]
    CommandNotFound(String),

    /// A redirection target could not be opened for the requested mode.
    #[error("{path}: {source}")]
    Redirect {
        path: String,
        #[source]
        source: io::Error,
    },

    /// pipe(2), fork(2) or a descriptor operation failed.
    #[error("{context}: {source}")]
    Syscall {
        context: &'static str,
        #[source]
        source: nix::Error,
    },

    /// `cd` target missing or not a directory; the working directory is
    /// left unchanged.
    #[error("cd: {0}: No such file or directory")]
    CdTargetInvalid(String),

    #[error("cd: HOME not set")]
    HomeNotSet,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ShellError {
    pub(crate) fn syscall(context: &'static str, source: nix::Error) -> Self {
        ShellError::Syscall { context, source }
    }
}
