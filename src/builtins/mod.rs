//! Commands implemented inside the shell.
//!
//! Every builtin has the same shape: it receives the shell and its full
//! argument vector (including its own name) and returns an exit status.
//! Errors are returned as [`ShellError`]s and reported by the caller, which
//! also decides whether they are fatal.

mod env;
mod flow;
mod io;
mod jobs;
pub mod test;
mod vars;

use crate::shell::Shell;
use crate::sys;
use crate::types::{ExecuteResult, ShellError};

pub type BuiltinFn = fn(&mut Shell, &[String]) -> ExecuteResult<i32>;

pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
    /// POSIX special builtin: errors are fatal in a non-interactive shell
    /// and prefix assignments stay in effect afterwards.
    pub special: bool,
}

const fn special(name: &'static str, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        func,
        special: true,
    }
}

const fn regular(name: &'static str, func: BuiltinFn) -> Builtin {
    Builtin {
        name,
        func,
        special: false,
    }
}

pub static BUILTINS: &[Builtin] = &[
    special(":", builtin_true),
    special(".", flow::dot),
    special("break", flow::break_),
    special("continue", flow::continue_),
    special("eval", flow::eval),
    special("exec", flow::exec),
    special("exit", flow::exit),
    special("export", vars::export),
    special("readonly", vars::readonly),
    special("return", flow::return_),
    special("set", vars::set),
    special("shift", vars::shift),
    special("source", flow::dot),
    special("times", env::times),
    special("trap", flow::trap),
    special("unset", vars::unset),
    regular("[", test::test),
    regular("alias", env::alias),
    regular("bg", jobs::bg),
    regular("cd", env::cd),
    regular("chdir", env::cd),
    regular("command", flow::command),
    regular("echo", io::echo),
    regular("false", builtin_false),
    regular("fg", jobs::fg),
    regular("getopts", vars::getopts),
    regular("hash", flow::hash),
    regular("history", env::history),
    regular("jobs", jobs::jobs),
    regular("kill", jobs::kill),
    regular("let", vars::let_),
    regular("local", vars::local),
    regular("printf", io::printf),
    regular("pwd", env::pwd),
    regular("read", io::read),
    regular("test", test::test),
    regular("true", builtin_true),
    regular("type", flow::type_),
    regular("ulimit", env::ulimit),
    regular("umask", env::umask),
    regular("unalias", env::unalias),
    regular("wait", jobs::wait),
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|b| b.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    BUILTINS.iter().map(|b| b.name)
}

/// Writes builtin output directly to descriptor 1, so it lands wherever
/// the current redirections point.
pub(crate) fn print(name: &str, text: &str) -> Result<(), ShellError> {
    sys::write_all(1, text.as_bytes())
        .map_err(|e| ShellError::builtin(name, format!("write error: {}", e.desc())))
}

pub(crate) fn print_lines(name: &str, lines: &[String]) -> Result<(), ShellError> {
    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    print(name, &text)
}

/// Diagnostics that do not stop the builtin.
pub(crate) fn warn(shell: &Shell, name: &str, message: impl Into<String>) {
    shell.report(&ShellError::builtin(name, message));
}

/// Parses a count argument such as the `n` of `break n`.
pub(crate) fn parse_count(name: &str, arg: &str) -> Result<i64, ShellError> {
    crate::utils::parse_number(arg).ok_or_else(|| ShellError::builtin(name, format!("Illegal number: {}", arg)))
}

/// Splits leading single-letter options from operands. Stops at `--`, a
/// lone `-`, or the first operand. Letters not in `allowed` are an error.
pub(crate) fn parse_flags<'a>(
    name: &str,
    args: &'a [String],
    allowed: &str,
) -> Result<(Vec<char>, &'a [String]), ShellError> {
    let mut flags = Vec::new();
    let mut i = 0;
    while let Some(arg) = args.get(i) {
        if arg == "--" {
            i += 1;
            break;
        }
        if arg.len() < 2 || !arg.starts_with('-') {
            break;
        }
        for c in arg[1..].chars() {
            if !allowed.contains(c) {
                return Err(ShellError::builtin(name, format!("Illegal option -{}", c)));
            }
            flags.push(c);
        }
        i += 1;
    }
    Ok((flags, &args[i..]))
}

fn builtin_true(_shell: &mut Shell, _args: &[String]) -> ExecuteResult<i32> {
    Ok(0)
}

fn builtin_false(_shell: &mut Shell, _args: &[String]) -> ExecuteResult<i32> {
    Ok(1)
}
