//! Builtins for the process environment: directories, limits, aliases
//! and history.

use std::path::{Component, Path, PathBuf};

use super::{parse_flags, print, print_lines};
use crate::shell::Shell;
use crate::sys::{self, LIMITS, RLIM_INFINITY};
use crate::types::{ExecuteResult, ShellError};
use crate::utils::shell_quote;

/// Joins `dir` onto `base` and removes `.` and `..` components without
/// consulting the file system.
fn logical_path(base: &str, dir: &str) -> String {
    let joined = if dir.starts_with('/') {
        PathBuf::from(dir)
    } else {
        Path::new(base).join(dir)
    };
    let mut parts: Vec<String> = Vec::new();
    for component in joined.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    format!("/{}", parts.join("/"))
}

fn current_dir() -> Option<String> {
    std::env::current_dir()
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
}

/// `cd [-L|-P] [dir | -]`
pub fn cd(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("cd", &args[1..], "LP")?;
    let physical = flags.last() == Some(&'P');
    let mut announce = false;
    let target = match operands.first().map(String::as_str) {
        None => shell
            .get_var("HOME")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| ShellError::builtin("cd", "HOME not set"))?,
        Some("-") => {
            announce = true;
            shell
                .get_var("OLDPWD")
                .ok_or_else(|| ShellError::builtin("cd", "OLDPWD not set"))?
        }
        Some(dir) => dir.to_string(),
    };

    let mut candidates = Vec::new();
    let relative = !target.starts_with('/')
        && !matches!(target.as_str(), "." | "..")
        && !target.starts_with("./")
        && !target.starts_with("../");
    if relative {
        if let Some(cdpath) = shell.get_var("CDPATH") {
            for entry in cdpath.split(':') {
                if entry.is_empty() {
                    candidates.push((target.clone(), false));
                } else {
                    candidates.push((format!("{}/{}", entry.trim_end_matches('/'), target), true));
                }
            }
        }
    }
    candidates.push((target.clone(), false));

    let old = shell
        .get_var("PWD")
        .filter(|p| p.starts_with('/'))
        .or_else(current_dir)
        .unwrap_or_else(|| "/".to_string());
    for (candidate, via_cdpath) in candidates {
        let logical = logical_path(&old, &candidate);
        let changed = if physical {
            std::env::set_current_dir(&candidate).is_ok()
        } else {
            std::env::set_current_dir(&logical).is_ok() || std::env::set_current_dir(&candidate).is_ok()
        };
        if !changed {
            continue;
        }
        let new = if physical || !Path::new(&logical).is_dir() {
            current_dir().unwrap_or(logical)
        } else {
            logical
        };
        shell.set_var("OLDPWD", &old)?;
        shell.set_var("PWD", &new)?;
        shell.cmd_cache.retain(|_, path| path.starts_with('/'));
        if announce || via_cdpath {
            print("cd", &format!("{}\n", new))?;
        }
        return Ok(0);
    }
    Err(ShellError::builtin("cd", format!("can't cd to {}", target)).into())
}

/// `pwd [-L|-P]`
pub fn pwd(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, _) = parse_flags("pwd", &args[1..], "LP")?;
    let physical = flags.last() == Some(&'P');
    let cwd = current_dir().ok_or_else(|| ShellError::builtin("pwd", "cannot determine current directory"))?;
    let logical = shell.get_var("PWD").filter(|pwd| {
        pwd.starts_with('/')
            && std::fs::canonicalize(pwd).ok() == std::fs::canonicalize(&cwd).ok()
    });
    let dir = match logical {
        Some(pwd) if !physical => pwd,
        _ => std::fs::canonicalize(&cwd)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or(cwd),
    };
    print("pwd", &format!("{}\n", dir))?;
    Ok(0)
}

/// `u=rwx,g=rx,o=rx` form of the permissions a mask leaves.
fn symbolic_mask(mask: u32) -> String {
    let allowed = !mask & 0o777;
    ["u", "g", "o"]
        .iter()
        .enumerate()
        .map(|(i, who)| {
            let bits = (allowed >> (6 - 3 * i)) & 7;
            let mut s = format!("{}=", who);
            for (bit, c) in [(4, 'r'), (2, 'w'), (1, 'x')] {
                if bits & bit != 0 {
                    s.push(c);
                }
            }
            s
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Applies a symbolic mode like `u=rwx,go-w` to the allowed permissions.
fn apply_symbolic(allowed: u32, mode: &str) -> Option<u32> {
    let mut allowed = allowed;
    for clause in mode.split(',') {
        let mut chars = clause.chars().peekable();
        let mut who = 0;
        while let Some(&c) = chars.peek() {
            who |= match c {
                'u' => 0o700,
                'g' => 0o070,
                'o' => 0o007,
                'a' => 0o777,
                _ => break,
            };
            chars.next();
        }
        if who == 0 {
            who = 0o777;
        }
        let mut applied = false;
        while let Some(op) = chars.next() {
            if !matches!(op, '+' | '-' | '=') {
                return None;
            }
            let mut perm = 0;
            while let Some(&c) = chars.peek() {
                perm |= match c {
                    'r' => 0o444,
                    'w' => 0o222,
                    'x' => 0o111,
                    _ => break,
                };
                chars.next();
            }
            let bits = perm & who;
            match op {
                '+' => allowed |= bits,
                '-' => allowed &= !bits,
                _ => allowed = (allowed & !who) | bits,
            }
            applied = true;
        }
        if !applied {
            return None;
        }
    }
    Some(allowed)
}

/// `umask [-S] [mode]`
pub fn umask(_shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("umask", &args[1..], "S")?;
    let mask = sys::get_umask();
    let Some(mode) = operands.first() else {
        let text = if flags.contains(&'S') {
            symbolic_mask(mask)
        } else {
            format!("{:04o}", mask)
        };
        print("umask", &format!("{}\n", text))?;
        return Ok(0);
    };
    let new = if mode.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        u32::from_str_radix(mode, 8).ok()
    } else {
        apply_symbolic(!mask & 0o777, mode).map(|allowed| !allowed & 0o777)
    };
    let new = new.ok_or_else(|| ShellError::builtin("umask", format!("Illegal mode: {}", mode)))?;
    sys::umask(new);
    Ok(0)
}

fn limit_text(value: u64, factor: u64) -> String {
    if value == RLIM_INFINITY {
        "unlimited".to_string()
    } else {
        (value / factor).to_string()
    }
}

/// `ulimit [-HSa] [-tfdscmlpnv] [limit]`
pub fn ulimit(_shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let mut hard = false;
    let mut soft = false;
    let mut all = false;
    let mut letter = 'f';
    let mut i = 1;
    while let Some(arg) = args.get(i) {
        let Some(letters) = arg.strip_prefix('-').filter(|l| !l.is_empty()) else {
            break;
        };
        for c in letters.chars() {
            match c {
                'H' => hard = true,
                'S' => soft = true,
                'a' => all = true,
                c if LIMITS.iter().any(|l| l.letter == c) => letter = c,
                other => return Err(ShellError::builtin("ulimit", format!("Illegal option -{}", other)).into()),
            }
        }
        i += 1;
    }
    let pick = |(cur, max): (u64, u64)| if hard { max } else { cur };

    if all {
        let mut lines = Vec::new();
        for limit in LIMITS {
            let value = sys::getrlimit(limit.resource).map_err(|e| ShellError::os("ulimit", e))?;
            lines.push(format!("{:<20} {}", limit.name, limit_text(pick(value), limit.factor)));
        }
        print_lines("ulimit", &lines)?;
        return Ok(0);
    }

    let Some(limit) = LIMITS.iter().find(|l| l.letter == letter) else {
        return Err(ShellError::builtin("ulimit", "bad resource").into());
    };
    let (cur, max) = sys::getrlimit(limit.resource).map_err(|e| ShellError::os("ulimit", e))?;
    let Some(value) = args.get(i) else {
        print("ulimit", &format!("{}\n", limit_text(pick((cur, max)), limit.factor)))?;
        return Ok(0);
    };
    let new = if value == "unlimited" {
        RLIM_INFINITY
    } else {
        value
            .parse::<u64>()
            .ok()
            .and_then(|v| v.checked_mul(limit.factor))
            .ok_or_else(|| ShellError::builtin("ulimit", format!("bad number: {}", value)))?
    };
    let (set_soft, set_hard) = if !hard && !soft { (true, true) } else { (soft, hard) };
    let soft_value = if set_soft { new } else { cur };
    let hard_value = if set_hard { new } else { max };
    sys::setrlimit(limit.resource, soft_value, hard_value).map_err(|e| ShellError::os("ulimit", e))?;
    Ok(0)
}

fn format_time(secs: f64) -> String {
    let minutes = (secs / 60.0).floor();
    format!("{}m{:.3}s", minutes as u64, secs - minutes * 60.0)
}

/// `times`: user and system time of the shell, then of its children.
pub fn times(_shell: &mut Shell, _args: &[String]) -> ExecuteResult<i32> {
    let lines: Vec<String> = sys::times()
        .iter()
        .map(|(user, system)| format!("{} {}", format_time(*user), format_time(*system)))
        .collect();
    print_lines("times", &lines)?;
    Ok(0)
}

/// `alias [name[=value]...]`
pub fn alias(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let line = |name: &str, value: &str| format!("alias {}={}", name, shell_quote(value));
    if args.len() == 1 {
        let mut names: Vec<&String> = shell.aliases.keys().collect();
        names.sort();
        let lines: Vec<String> = names.iter().map(|n| line(n, &shell.aliases[*n])).collect();
        print_lines("alias", &lines)?;
        return Ok(0);
    }
    let mut status = 0;
    let mut out = Vec::new();
    for arg in &args[1..] {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                shell.aliases.insert(name.to_string(), value.to_string());
            }
            _ => match shell.aliases.get(arg.as_str()) {
                Some(value) => out.push(line(arg, value)),
                None => {
                    shell.report(&ShellError::builtin("alias", format!("{} not found", arg)));
                    status = 1;
                }
            },
        }
    }
    print_lines("alias", &out)?;
    Ok(status)
}

/// `unalias [-a] name...`
pub fn unalias(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("unalias", &args[1..], "a")?;
    if flags.contains(&'a') {
        shell.aliases.clear();
        return Ok(0);
    }
    let mut status = 0;
    for name in operands {
        if shell.aliases.remove(name).is_none() {
            shell.report(&ShellError::builtin("unalias", format!("{} not found", name)));
            status = 1;
        }
    }
    Ok(status)
}

/// `history [-c] [n]`
pub fn history(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("history", &args[1..], "c")?;
    if flags.contains(&'c') {
        shell.history.borrow_mut().clear();
        return Ok(0);
    }
    let last = match operands.first() {
        Some(n) => Some(
            n.parse::<usize>()
                .map_err(|_| ShellError::builtin("history", format!("{}: numeric argument required", n)))?,
        ),
        None => None,
    };
    let lines = shell.history.borrow().listing(last);
    print_lines("history", &lines)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logical_path() {
        assert_eq!(logical_path("/usr/lib", "../bin"), "/usr/bin");
        assert_eq!(logical_path("/usr", "./local/./share"), "/usr/local/share");
        assert_eq!(logical_path("/a/b", "/c/../d"), "/d");
        assert_eq!(logical_path("/", ".."), "/");
    }

    #[test]
    fn test_umask_modes() {
        assert_eq!(symbolic_mask(0o022), "u=rwx,g=rx,o=rx");
        assert_eq!(symbolic_mask(0o077), "u=rwx,g=,o=");
        assert_eq!(apply_symbolic(0o755, "g+w"), Some(0o775));
        assert_eq!(apply_symbolic(0o777, "go-w,o-x"), Some(0o754));
        assert_eq!(apply_symbolic(0o755, "u=rw"), Some(0o655));
        assert_eq!(apply_symbolic(0o755, "q+w"), None);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0m0.000s");
        assert_eq!(format_time(61.5), "1m1.500s");
    }
}
