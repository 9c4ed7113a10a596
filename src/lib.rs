//! A small interactive command shell.
//!
//! This crate implements the pieces that make a shell a shell: a
//! quote-aware lexer, a pipeline parser with redirection extraction, a
//! set of built-in commands, a PATH-backed command index, an interactive
//! completion engine and a process orchestrator that wires pipes across
//! forked stages and reaps them.
//!
//! The main entry point is [`Interpreter`], which runs the read-eval
//! loop on top of `rustyline`. The individual subsystems are exposed as
//! public modules so they can be exercised directly.

pub mod builtin;
pub mod completion;
pub mod error;
pub mod executor;
pub mod external;
mod interpreter;
pub mod lexer;
pub mod parser;

pub use interpreter::Interpreter;
