//! Control flow, command lookup and traps.

use std::path::{Path, PathBuf};

use super::{parse_count, parse_flags, print_lines};
use crate::executor::{EvalFlags, Target};
use crate::parser::KEYWORDS;
use crate::shell::{Shell, Skip};
use crate::signals::{self, slot_name};
use crate::types::{Exception, ExecuteResult, ShellError};
use crate::utils::{io_reason, shell_quote, Lookup};

/// Search path used by `command -p`.
const STANDARD_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// `break [n]`
pub fn break_(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let n = loop_count("break", args)?;
    if shell.loop_depth > 0 {
        shell.skip = Skip::Break(n.min(shell.loop_depth));
    }
    Ok(0)
}

/// `continue [n]`
pub fn continue_(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let n = loop_count("continue", args)?;
    if shell.loop_depth > 0 {
        shell.skip = Skip::Continue(n.min(shell.loop_depth));
    }
    Ok(0)
}

fn loop_count(name: &str, args: &[String]) -> Result<usize, ShellError> {
    match args.get(1) {
        None => Ok(1),
        Some(arg) => match parse_count(name, arg)? {
            0 => Err(ShellError::builtin(name, format!("Illegal number: {}", arg))),
            n => Ok(n as usize),
        },
    }
}

/// `return [n]`: leaves the current function or dot script.
pub fn return_(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    if shell.func_depth == 0 && shell.dot_depth == 0 {
        return Err(ShellError::builtin("return", "can only return from a function or sourced script").into());
    }
    let status = match args.get(1) {
        Some(arg) => parse_count("return", arg)? as i32 & 0xff,
        None => shell.last_status,
    };
    shell.skip = Skip::Return;
    shell.last_status = status;
    Ok(status)
}

/// `exit [n]`
pub fn exit(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let status = match args.get(1) {
        Some(arg) => parse_count("exit", arg)? as i32 & 0xff,
        None => shell.last_status,
    };
    Err(Exception::Exit(status))
}

/// `eval [arg...]`
pub fn eval(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let text = args[1..].join(" ");
    if text.trim().is_empty() {
        return Ok(0);
    }
    shell.eval_string(&text)
}

/// `exec [command [arg...]]`. Without a command the redirections have
/// already been made permanent by the caller.
pub fn exec(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let Some(name) = args.get(1) else {
        return Ok(0);
    };
    let path = match shell.find_command(name) {
        Lookup::Found(path) => path.to_string_lossy().into_owned(),
        Lookup::NotExecutable(_) => return Err(ShellError::NotExecutable(name.clone()).into()),
        Lookup::NotFound => return Err(ShellError::NotFound(name.clone()).into()),
    };
    let env = shell.vars.environ();
    let status = shell.exec_program(&path, &args[1..], &env);
    if shell.is_interactive() {
        Ok(status)
    } else {
        Err(Exception::Exit(status))
    }
}

/// Finds the file named by `.`: a name without a slash is searched for in
/// `PATH`, then in the current directory.
fn find_dot_file(shell: &Shell, name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        return Some(PathBuf::from(name));
    }
    let path = shell.get_var("PATH").unwrap_or_default();
    path.split(':')
        .map(|dir| Path::new(if dir.is_empty() { "." } else { dir }).join(name))
        .find(|candidate| candidate.is_file())
        .or_else(|| Path::new(name).is_file().then(|| PathBuf::from(name)))
}

/// `. file [arg...]` and `source`.
pub fn dot(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let Some(name) = args.get(1) else {
        return Err(ShellError::builtin(&args[0], "filename argument required").into());
    };
    let Some(path) = find_dot_file(shell, name) else {
        return Err(ShellError::builtin(&args[0], format!("{}: not found", name)).into());
    };
    let file = Shell::open_script(&path).map_err(|e| {
        ShellError::Redirect {
            action: "open",
            path: path.display().to_string(),
            reason: io_reason(&e),
        }
        .in_builtin(&args[0])
    })?;
    let saved = (args.len() > 2).then(|| std::mem::replace(&mut shell.positional, args[2..].to_vec()));
    let result = shell.source_opened(file, &path);
    if let Some(positional) = saved {
        shell.positional = positional;
    }
    result
}

/// One line of `type` or `command -V` output. `None` when not found.
fn describe(shell: &mut Shell, name: &str) -> Option<String> {
    if let Some(value) = shell.aliases.get(name) {
        return Some(format!("{} is an alias for {}", name, value));
    }
    if KEYWORDS.contains(&name) {
        return Some(format!("{} is a shell keyword", name));
    }
    match shell.resolve(name, true) {
        Target::Function(_) => Some(format!("{} is a shell function", name)),
        Target::Builtin(b) if b.special => Some(format!("{} is a special shell builtin", name)),
        Target::Builtin(_) => Some(format!("{} is a shell builtin", name)),
        Target::External(path) => Some(format!("{} is {}", name, path)),
        Target::Missing(_) => None,
    }
}

/// `type name...`
pub fn type_(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let mut status = 0;
    let mut out = Vec::new();
    for name in &args[1..] {
        match describe(shell, name) {
            Some(line) => out.push(line),
            None => {
                out.push(format!("{}: not found", name));
                status = 1;
            }
        }
    }
    print_lines("type", &out)?;
    Ok(status)
}

/// `command -v` output: how the name would be run, in reusable form.
fn command_path(shell: &mut Shell, name: &str) -> Option<String> {
    if let Some(value) = shell.aliases.get(name) {
        return Some(format!("alias {}={}", name, shell_quote(value)));
    }
    if KEYWORDS.contains(&name) {
        return Some(name.to_string());
    }
    match shell.resolve(name, true) {
        Target::Function(_) | Target::Builtin(_) => Some(name.to_string()),
        Target::External(path) => Some(path),
        Target::Missing(_) => None,
    }
}

/// `command [-pvV] name [arg...]`: runs `name` skipping functions, or
/// describes it.
pub fn command(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("command", &args[1..], "pvV")?;
    let Some(name) = operands.first() else {
        return Ok(0);
    };
    if flags.contains(&'v') || flags.contains(&'V') {
        let verbose = flags.contains(&'V');
        let mut status = 0;
        let mut out = Vec::new();
        for name in operands {
            let line = if verbose {
                describe(shell, name)
            } else {
                command_path(shell, name)
            };
            match line {
                Some(line) => out.push(line),
                None => {
                    if verbose {
                        out.push(format!("{}: not found", name));
                    }
                    status = 127;
                }
            }
        }
        print_lines("command", &out)?;
        return Ok(status);
    }

    let target = if flags.contains(&'p') && !name.contains('/') {
        match crate::builtins::lookup(name) {
            Some(b) => Target::Builtin(b),
            None => match crate::utils::search_cmd(name, STANDARD_PATH) {
                Lookup::Found(path) => Target::External(path.to_string_lossy().into_owned()),
                Lookup::NotExecutable(_) => Target::Missing(ShellError::NotExecutable(name.clone())),
                Lookup::NotFound => Target::Missing(ShellError::NotFound(name.clone())),
            },
        }
    } else {
        shell.resolve(name, false)
    };
    let flags = EvalFlags {
        tested: shell.cond_context,
        exit: false,
    };
    match target {
        // Special builtins lose their special error handling under `command`.
        Target::Builtin(b) => match (b.func)(shell, operands) {
            Err(Exception::Error(e)) => {
                shell.report(&e);
                Ok(e.exit_status())
            }
            other => other,
        },
        Target::External(path) => shell.run_external(&path, operands, &[], flags),
        Target::Function(body) => shell.call_function(name, body, operands, flags),
        Target::Missing(e) => {
            shell.report(&e);
            Ok(e.exit_status())
        }
    }
}

/// `hash [-r] [name...]`
pub fn hash(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("hash", &args[1..], "r")?;
    if flags.contains(&'r') {
        shell.cmd_cache.clear();
    }
    if operands.is_empty() {
        if !flags.contains(&'r') {
            let mut entries: Vec<String> = shell.cmd_cache.values().cloned().collect();
            entries.sort();
            print_lines("hash", &entries)?;
        }
        return Ok(0);
    }
    let mut status = 0;
    for name in operands {
        if name.contains('/') || crate::builtins::lookup(name).is_some() || shell.functions.contains_key(name) {
            continue;
        }
        shell.cmd_cache.remove(name);
        if !matches!(shell.find_command(name), Lookup::Found(_)) {
            shell.report(&ShellError::builtin("hash", format!("{}: not found", name)));
            status = 1;
        }
    }
    Ok(status)
}

/// `trap -p` / `trap` output.
fn trap_listing(shell: &Shell) -> Vec<String> {
    shell
        .traps
        .iter()
        .map(|(slot, action)| format!("trap -- {} {}", shell_quote(action), slot_name(slot)))
        .collect()
}

/// `trap [-lp] [action] condition...`
pub fn trap(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("trap", &args[1..], "lp")?;
    if flags.contains(&'l') {
        let lines: Vec<String> = signals::all_signals()
            .into_iter()
            .map(|(n, name)| format!("{:2}) SIG{}", n, name))
            .collect();
        print_lines("trap", &lines)?;
        return Ok(0);
    }
    if operands.is_empty() || flags.contains(&'p') {
        let mut lines = trap_listing(shell);
        if !operands.is_empty() {
            let wanted: Vec<String> = operands
                .iter()
                .filter_map(|o| signals::parse_signal(o))
                .map(slot_name)
                .collect();
            lines.retain(|line| wanted.iter().any(|w| line.ends_with(&format!(" {}", w))));
        }
        print_lines("trap", &lines)?;
        return Ok(0);
    }

    // A first operand that is a signal number means every operand is a
    // condition to reset.
    let (action, conditions) = if operands[0].bytes().all(|b| b.is_ascii_digit()) {
        (None, operands)
    } else {
        let action = match operands[0].as_str() {
            "-" => None,
            other => Some(other.to_string()),
        };
        (action, &operands[1..])
    };
    if conditions.is_empty() {
        return Err(ShellError::builtin("trap", "condition expected").into());
    }
    let mut status = 0;
    for cond in conditions {
        let Some(slot) = signals::parse_signal(cond) else {
            shell.report(&ShellError::builtin("trap", format!("{}: bad trap", cond)));
            status = 1;
            continue;
        };
        if let Err(e) = shell.traps.set(slot, action.clone()) {
            shell.report(&e);
            status = 1;
        }
    }
    Ok(status)
}
