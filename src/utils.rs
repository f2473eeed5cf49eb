use std::path::{Path, PathBuf};

/// Result of searching `PATH` for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(PathBuf),
    /// A file exists but is not executable (or is a directory).
    NotExecutable(PathBuf),
    NotFound,
}

pub fn search_cmd(cmd: &str, paths: &str) -> Lookup {
    // A command containing a slash is used directly without PATH search
    if cmd.contains('/') {
        let path = Path::new(cmd);
        return if is_executable(path) {
            Lookup::Found(path.to_path_buf())
        } else if path.exists() {
            Lookup::NotExecutable(path.to_path_buf())
        } else {
            Lookup::NotFound
        };
    }

    let mut denied = None;
    for dir in paths.split(':') {
        // An empty PATH entry means the current directory
        let dir = if dir.is_empty() { "." } else { dir };
        let cmd_path = Path::new(dir).join(cmd);
        if is_executable(&cmd_path) {
            return Lookup::Found(cmd_path);
        }
        if denied.is_none() && cmd_path.is_file() {
            denied = Some(cmd_path);
        }
    }
    match denied {
        Some(path) => Lookup::NotExecutable(path),
        None => Lookup::NotFound,
    }
}

pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match path.metadata() {
        Ok(metadata) => metadata.is_file() && metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// A valid variable name: a letter or underscore followed by letters,
/// digits and underscores.
pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Quotes `s` so the shell reads it back as the same single word.
pub fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./,:+@%=".contains(c));
    if safe {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

/// Parses a non-negative decimal number, as used for descriptors and
/// counts given to builtins.
pub fn parse_number(s: &str) -> Option<i64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Splits `NAME=value` text.
pub fn split_assignment(s: &str) -> Option<(&str, &str)> {
    let eq = s.find('=')?;
    let (name, value) = (&s[..eq], &s[eq + 1..]);
    if is_name(name) {
        Some((name, value))
    } else {
        None
    }
}

/// Short reason text for an I/O error, as shown in diagnostics.
pub fn io_reason(e: &std::io::Error) -> String {
    match e.raw_os_error() {
        Some(code) => crate::redir::errno_reason("open", nix::errno::Errno::from_i32(code)),
        None => e.to_string(),
    }
}
