//! Builtins that work on variables, options and positional parameters.

use super::{parse_count, parse_flags, print_lines, warn};
use crate::arith;
use crate::options::{scan_options, Opt};
use crate::shell::Shell;
use crate::types::{ExecuteResult, ShellError};
use crate::utils::{is_name, shell_quote, split_assignment};

/// `export [-pn] [name[=value]...]`
pub fn export(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("export", &args[1..], "pn")?;
    if operands.is_empty() {
        let lines = shell.vars.listing("export", |v| v.exported);
        print_lines("export", &lines)?;
        return Ok(0);
    }
    let unexport = flags.contains(&'n');
    for arg in operands {
        if let Some((name, value)) = split_assignment(arg) {
            let hook = shell.vars.export(name, Some(value)).map_err(|e| e.in_builtin("export"))?;
            if let Some(hook) = hook {
                shell.run_hook(hook);
            }
            if unexport {
                shell.vars.unexport(name);
            }
        } else if is_name(arg) {
            if unexport {
                shell.vars.unexport(arg);
            } else {
                shell.vars.export(arg, None).map_err(|e| e.in_builtin("export"))?;
            }
        } else {
            return Err(ShellError::BadName(arg.clone()).in_builtin("export").into());
        }
    }
    Ok(0)
}

/// `readonly [-p] [name[=value]...]`
pub fn readonly(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (_, operands) = parse_flags("readonly", &args[1..], "p")?;
    if operands.is_empty() {
        let lines = shell.vars.listing("readonly", |v| v.readonly);
        print_lines("readonly", &lines)?;
        return Ok(0);
    }
    for arg in operands {
        let hook = match split_assignment(arg) {
            Some((name, value)) => shell.vars.set_readonly(name, Some(value)),
            None if is_name(arg) => shell.vars.set_readonly(arg, None),
            None => Err(ShellError::BadName(arg.clone())),
        }
        .map_err(|e| e.in_builtin("readonly"))?;
        if let Some(hook) = hook {
            shell.run_hook(hook);
        }
    }
    Ok(0)
}

/// `unset [-fv] name...`. Without a flag a name that is not a variable
/// removes the function of that name.
pub fn unset(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("unset", &args[1..], "fv")?;
    let functions_only = flags.last() == Some(&'f');
    let variables_only = flags.last() == Some(&'v');
    for name in operands {
        if functions_only {
            shell.functions.remove(name);
            continue;
        }
        if !is_name(name) {
            return Err(ShellError::BadName(name.clone()).in_builtin("unset").into());
        }
        if variables_only || shell.vars.get(name).is_some() || !shell.functions.contains_key(name) {
            shell.unset_var(name).map_err(|e| e.in_builtin("unset"))?;
        } else {
            shell.functions.remove(name);
        }
    }
    Ok(0)
}

/// `local [name[=value] | -]...`
pub fn local(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    if shell.func_depth == 0 {
        return Err(ShellError::builtin("local", "not in a function").into());
    }
    for arg in &args[1..] {
        if arg == "-" {
            let letters = shell.options.letters();
            shell.vars.save_options(letters).map_err(|e| e.in_builtin("local"))?;
            continue;
        }
        let hook = match split_assignment(arg) {
            Some((name, value)) => shell.vars.make_local(name, Some(value)),
            None if is_name(arg) => shell.vars.make_local(arg, None),
            None => Err(ShellError::BadName(arg.clone())),
        }
        .map_err(|e| e.in_builtin("local"))?;
        if let Some(hook) = hook {
            shell.run_hook(hook);
        }
    }
    Ok(0)
}

/// `set` with no arguments: every variable with a value, quoted for
/// re-reading.
fn list_variables(shell: &Shell) -> Vec<String> {
    shell
        .vars
        .sorted_names()
        .into_iter()
        .filter_map(|name| {
            let value = shell.get_var(name)?;
            Some(format!("{}={}", name, shell_quote(&value)))
        })
        .collect()
}

/// `set [-+abCefhmnuvx] [-+o name] [--] [arg...]`
pub fn set(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    if args.len() == 1 {
        let lines = list_variables(shell);
        print_lines("set", &lines)?;
        return Ok(0);
    }
    let mut opts = shell.options.clone();
    let scan = scan_options(&args[1..], &mut opts, "", "set")?;
    let monitor = opts.get(Opt::Monitor);
    opts.set(Opt::Monitor, shell.options.get(Opt::Monitor));
    shell.options = opts;
    if monitor != shell.options.get(Opt::Monitor) {
        shell.set_option(Opt::Monitor, monitor);
    }
    match scan.list {
        Some(false) => print_lines("set", &shell.options.listing())?,
        Some(true) => print_lines("set", &shell.options.restore_commands())?,
        None => {}
    }
    let operands = &args[1 + scan.next..];
    if !operands.is_empty() || scan.end_marker {
        shell.positional = operands.to_vec();
        shell.getopts_pos = 0;
    }
    Ok(0)
}

/// `shift [n]`
pub fn shift(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let n = match args.get(1) {
        Some(arg) => parse_count("shift", arg)? as usize,
        None => 1,
    };
    if n > shell.positional.len() {
        return Err(ShellError::builtin("shift", "can't shift that many").into());
    }
    shell.positional.drain(..n);
    Ok(0)
}

/// `getopts optstring name [arg...]`. `OPTIND` holds the index of the next
/// argument; the position inside a bundled argument like `-abc` is kept
/// in the shell and reset whenever `OPTIND` is assigned.
pub fn getopts(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (Some(optstring), Some(name)) = (args.get(1), args.get(2)) else {
        return Err(ShellError::builtin("getopts", "usage: getopts optstring var [arg ...]").into());
    };
    if !is_name(name) {
        return Err(ShellError::BadName(name.clone()).in_builtin("getopts").into());
    }
    let params: Vec<String> = if args.len() > 3 {
        args[3..].to_vec()
    } else {
        shell.positional.clone()
    };
    let silent = optstring.starts_with(':');
    let spec = optstring.trim_start_matches(':');
    let mut optind = shell
        .get_var("OPTIND")
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|&n| n >= 1)
        .unwrap_or(1);

    let finish = |shell: &mut Shell, optind: usize| -> ExecuteResult<i32> {
        shell.getopts_pos = 0;
        let _ = shell.vars.set("OPTIND", &optind.to_string(), false);
        shell.unset_var("OPTARG")?;
        shell.set_var(name, "?")?;
        Ok(1)
    };

    if shell.getopts_pos == 0 {
        let Some(arg) = params.get(optind - 1) else {
            return finish(shell, optind);
        };
        if arg == "--" {
            return finish(shell, optind + 1);
        }
        if !arg.starts_with('-') || arg == "-" {
            return finish(shell, optind);
        }
        shell.getopts_pos = 1;
    }

    let arg: Vec<char> = params.get(optind - 1).map(|a| a.chars().collect()).unwrap_or_default();
    let Some(&c) = arg.get(shell.getopts_pos) else {
        return finish(shell, optind);
    };
    shell.getopts_pos += 1;
    let at_end = shell.getopts_pos >= arg.len();
    let advance = |shell: &mut Shell, optind: &mut usize| {
        *optind += 1;
        shell.getopts_pos = 0;
    };

    let found = spec.find(c).filter(|_| c != ':');
    let (result, optarg) = match found {
        None => {
            if !silent {
                warn(shell, "getopts", format!("Illegal option -{}", c));
            }
            if at_end {
                advance(shell, &mut optind);
            }
            ("?".to_string(), silent.then(|| c.to_string()))
        }
        Some(i) if spec[i + c.len_utf8()..].starts_with(':') => {
            if !at_end {
                let value: String = arg[shell.getopts_pos..].iter().collect();
                advance(shell, &mut optind);
                (c.to_string(), Some(value))
            } else if let Some(value) = params.get(optind) {
                let value = value.clone();
                optind += 2;
                shell.getopts_pos = 0;
                (c.to_string(), Some(value))
            } else {
                advance(shell, &mut optind);
                if silent {
                    (":".to_string(), Some(c.to_string()))
                } else {
                    warn(shell, "getopts", format!("No arg for -{} option", c));
                    ("?".to_string(), None)
                }
            }
        }
        Some(_) => {
            if at_end {
                advance(shell, &mut optind);
            }
            (c.to_string(), None)
        }
    };
    let _ = shell.vars.set("OPTIND", &optind.to_string(), false);
    match optarg {
        Some(value) => shell.set_var("OPTARG", &value)?,
        None => shell.unset_var("OPTARG")?,
    }
    shell.set_var(name, &result)?;
    Ok(0)
}

/// `let expr...`: status 0 when the last expression is non-zero.
pub fn let_(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    if args.len() < 2 {
        return Err(ShellError::builtin("let", "expression expected").into());
    }
    let mut last = 0;
    for expr in &args[1..] {
        last = arith::eval(expr, shell)?;
    }
    Ok(if last != 0 { 0 } else { 1 })
}
