//! A POSIX shell: lexer, parser, word expansion, an executor with job
//! control, and a fork-emulation spawn path.

pub mod arena;
pub mod arith;
pub mod ast;
pub mod builtins;
pub mod completion;
pub mod executor;
pub mod expand;
pub mod glob;
pub mod history;
pub mod input;
pub mod jobs;
pub mod lexer;
pub mod mail;
pub mod options;
pub mod parser;
pub mod pattern;
pub mod redir;
pub mod shell;
pub mod signals;
pub mod snapshot;
pub mod spawn;
pub mod sys;
pub mod tokenizer;
pub mod types;
pub mod utils;
pub mod vars;
pub mod word;

#[cfg(test)]
mod tests;
