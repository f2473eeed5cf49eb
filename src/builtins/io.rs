//! `echo`, `printf` and `read`.

use std::time::{Duration, Instant};

use nix::errno::Errno;

use super::{print, warn};
use crate::shell::Shell;
use crate::sys;
use crate::types::{ExecuteResult, ShellError};
use crate::utils::is_name;

/// Result of expanding backslash escapes: the text and whether `\c` asked
/// to stop all further output.
struct Escaped {
    text: String,
    stop: bool,
}

/// Backslash escapes of `echo -e` and `printf %b`. In `%b` an octal escape
/// is written `\0nnn`; in a format string it is `\nnn`.
fn expand_escapes(s: &str, format: bool) -> Escaped {
    let mut text = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            text.push(c);
            continue;
        }
        let Some(e) = chars.next() else {
            text.push('\\');
            break;
        };
        match e {
            'a' => text.push('\x07'),
            'b' => text.push('\x08'),
            'c' if !format => return Escaped { text, stop: true },
            'e' | 'E' => text.push('\x1b'),
            'f' => text.push('\x0c'),
            'n' => text.push('\n'),
            'r' => text.push('\r'),
            't' => text.push('\t'),
            'v' => text.push('\x0b'),
            '\\' => text.push('\\'),
            '0'..='7' if format || e == '0' => {
                let mut value = if format { e.to_digit(8).unwrap_or(0) } else { 0 };
                let max_digits = if format { 2 } else { 3 };
                for _ in 0..max_digits {
                    match chars.peek().and_then(|d| d.to_digit(8)) {
                        Some(d) => {
                            value = value * 8 + d;
                            chars.next();
                        }
                        None => break,
                    }
                }
                text.push(char::from((value & 0xff) as u8));
            }
            'x' => {
                let mut value = 0;
                let mut digits = 0;
                while digits < 2 {
                    match chars.peek().and_then(|d| d.to_digit(16)) {
                        Some(d) => {
                            value = value * 16 + d;
                            chars.next();
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    text.push_str("\\x");
                } else {
                    text.push(char::from(value as u8));
                }
            }
            other => {
                text.push('\\');
                text.push(other);
            }
        }
    }
    Escaped { text, stop: false }
}

/// `echo [-neE] [arg...]`
pub fn echo(_shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let mut newline = true;
    let mut escapes = false;
    let mut first = 1;
    while let Some(arg) = args.get(first) {
        let Some(letters) = arg.strip_prefix('-') else { break };
        if letters.is_empty() || !letters.chars().all(|c| matches!(c, 'n' | 'e' | 'E')) {
            break;
        }
        for c in letters.chars() {
            match c {
                'n' => newline = false,
                'e' => escapes = true,
                _ => escapes = false,
            }
        }
        first += 1;
    }
    let joined = args[first..].join(" ");
    let mut out = if escapes {
        let escaped = expand_escapes(&joined, false);
        if escaped.stop {
            print("echo", &escaped.text)?;
            return Ok(0);
        }
        escaped.text
    } else {
        joined
    };
    if newline {
        out.push('\n');
    }
    print("echo", &out)?;
    Ok(0)
}

/// A parsed `%` conversion.
#[derive(Default)]
struct Spec {
    left: bool,
    plus: bool,
    space: bool,
    alt: bool,
    zero: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String, numeric: bool) -> String {
        let width = self.width.unwrap_or(0);
        let len = body.chars().count();
        if len >= width {
            return body;
        }
        let fill = width - len;
        if self.left {
            return body + &" ".repeat(fill);
        }
        if self.zero && numeric {
            let sign_len = body
                .find(|c: char| c.is_ascii_alphanumeric())
                .map_or(0, |i| if body[i..].starts_with("0x") || body[i..].starts_with("0X") { i + 2 } else { i });
            let (sign, digits) = body.split_at(sign_len);
            return format!("{}{}{}", sign, "0".repeat(fill), digits);
        }
        " ".repeat(fill) + &body
    }

    fn sign(&self, negative: bool) -> &'static str {
        if negative {
            "-"
        } else if self.plus {
            "+"
        } else if self.space {
            " "
        } else {
            ""
        }
    }
}

/// Numeric argument: decimal, octal (`0`), hex (`0x`) or the character
/// code of a quoted character (`'a`).
fn parse_int(arg: &str) -> Option<i64> {
    let t = arg.trim_start();
    if let Some(rest) = t.strip_prefix(['\'', '"']) {
        return Some(rest.chars().next().map_or(0, |c| c as i64));
    }
    if t.is_empty() {
        return Some(0);
    }
    let (negative, body) = match t.strip_prefix('-') {
        Some(b) => (true, b),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let value = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else if body.len() > 1 && body.starts_with('0') {
        i64::from_str_radix(&body[1..], 8).ok()
    } else {
        body.parse().ok()
    }?;
    Some(if negative { -value } else { value })
}

fn parse_float(arg: &str) -> Option<f64> {
    let t = arg.trim();
    if t.is_empty() {
        return Some(0.0);
    }
    if t.starts_with(['\'', '"']) {
        return parse_int(t).map(|v| v as f64);
    }
    t.parse().ok()
}

/// C-style `%e`: at least two exponent digits with a sign.
fn format_exp(value: f64, precision: usize, upper: bool) -> String {
    let raw = format!("{:.*e}", precision, value);
    let (mantissa, exp) = raw.split_once('e').unwrap_or((&raw, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let text = format!("{}e{}{:02}", mantissa, if exp < 0 { '-' } else { '+' }, exp.abs());
    if upper {
        text.to_uppercase()
    } else {
        text
    }
}

/// C-style `%g`.
fn format_general(value: f64, precision: usize, alt: bool, upper: bool) -> String {
    let p = precision.max(1);
    if value == 0.0 {
        return if alt { format!("{:.*}", p - 1, 0.0) } else { "0".to_string() };
    }
    let exp_text = format!("{:.*e}", p - 1, value);
    let exp: i32 = exp_text
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    let mut text = if exp < -4 || exp >= p as i32 {
        format_exp(value, p - 1, upper)
    } else {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, value)
    };
    if !alt {
        let (body, suffix) = match text.find(['e', 'E']) {
            Some(i) => (text[..i].to_string(), text[i..].to_string()),
            None => (text.clone(), String::new()),
        };
        let body = if body.contains('.') {
            body.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            body
        };
        text = body + &suffix;
    }
    text
}

/// Output state of one `printf` run.
struct Printf<'a> {
    args: &'a [String],
    next: usize,
    out: String,
    status: i32,
    stop: bool,
}

impl<'a> Printf<'a> {
    fn arg(&mut self) -> Option<&'a str> {
        let arg = self.args.get(self.next).map(String::as_str);
        if arg.is_some() {
            self.next += 1;
        }
        arg
    }

    fn int_arg(&mut self) -> i64 {
        let Some(arg) = self.arg() else { return 0 };
        match parse_int(arg) {
            Some(v) => v,
            None => {
                let _ = sys::write_all(2, format!("printf: {}: invalid number\n", arg).as_bytes());
                self.status = 1;
                let digits: String = arg.chars().take_while(|c| c.is_ascii_digit() || *c == '-').collect();
                digits.parse().unwrap_or(0)
            }
        }
    }

    fn float_arg(&mut self) -> f64 {
        let Some(arg) = self.arg() else { return 0.0 };
        parse_float(arg).unwrap_or_else(|| {
            let _ = sys::write_all(2, format!("printf: {}: invalid number\n", arg).as_bytes());
            self.status = 1;
            0.0
        })
    }

    fn convert(&mut self, conv: char, spec: &Spec) -> Result<(), ShellError> {
        let text = match conv {
            's' => {
                let mut s = self.arg().unwrap_or("").to_string();
                if let Some(p) = spec.precision {
                    s = s.chars().take(p).collect();
                }
                spec.pad(s, false)
            }
            'b' => {
                let escaped = expand_escapes(self.arg().unwrap_or(""), false);
                if escaped.stop {
                    self.stop = true;
                }
                let mut s = escaped.text;
                if let Some(p) = spec.precision {
                    s = s.chars().take(p).collect();
                }
                spec.pad(s, false)
            }
            'c' => {
                let s: String = self.arg().unwrap_or("").chars().take(1).collect();
                spec.pad(s, false)
            }
            'd' | 'i' => {
                let v = self.int_arg();
                let mut digits = v.unsigned_abs().to_string();
                if let Some(p) = spec.precision {
                    if digits.len() < p {
                        digits = "0".repeat(p - digits.len()) + &digits;
                    }
                    if p == 0 && v == 0 {
                        digits.clear();
                    }
                }
                spec.pad(format!("{}{}", spec.sign(v < 0), digits), spec.precision.is_none())
            }
            'u' | 'o' | 'x' | 'X' => {
                let v = self.int_arg() as u64;
                let mut digits = match conv {
                    'u' => v.to_string(),
                    'o' => format!("{:o}", v),
                    'x' => format!("{:x}", v),
                    _ => format!("{:X}", v),
                };
                if let Some(p) = spec.precision {
                    if digits.len() < p {
                        digits = "0".repeat(p - digits.len()) + &digits;
                    }
                }
                let prefix = match conv {
                    'o' if spec.alt && !digits.starts_with('0') => "0",
                    'x' if spec.alt && v != 0 => "0x",
                    'X' if spec.alt && v != 0 => "0X",
                    _ => "",
                };
                spec.pad(format!("{}{}", prefix, digits), spec.precision.is_none())
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let v = self.float_arg();
                let precision = spec.precision.unwrap_or(6);
                let body = match conv {
                    'f' | 'F' => format!("{:.*}", precision, v.abs()),
                    'e' | 'E' => format_exp(v.abs(), precision, conv == 'E'),
                    _ => format_general(v.abs(), precision, spec.alt, conv == 'G'),
                };
                spec.pad(format!("{}{}", spec.sign(v.is_sign_negative() && v != 0.0), body), true)
            }
            other => {
                return Err(ShellError::builtin("printf", format!("%{}: invalid directive", other)));
            }
        };
        self.out.push_str(&text);
        Ok(())
    }

    /// One pass over the format string.
    fn run(&mut self, format: &str) -> Result<(), ShellError> {
        let mut chars = format.chars().peekable();
        let mut literal = String::new();
        while let Some(c) = chars.next() {
            match c {
                '\\' => {
                    literal.push('\\');
                    if let Some(n) = chars.next() {
                        literal.push(n);
                        if n == 'c' {
                            self.out.push_str(&expand_escapes(&literal, true).text);
                            self.stop = true;
                            return Ok(());
                        }
                    }
                }
                '%' => {
                    self.out.push_str(&expand_escapes(&literal, true).text);
                    literal.clear();
                    if chars.peek() == Some(&'%') {
                        chars.next();
                        self.out.push('%');
                        continue;
                    }
                    let mut spec = Spec::default();
                    while let Some(&f) = chars.peek() {
                        match f {
                            '-' => spec.left = true,
                            '+' => spec.plus = true,
                            ' ' => spec.space = true,
                            '#' => spec.alt = true,
                            '0' => spec.zero = true,
                            _ => break,
                        }
                        chars.next();
                    }
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        let w = self.int_arg();
                        if w < 0 {
                            spec.left = true;
                        }
                        spec.width = Some(w.unsigned_abs() as usize);
                    } else {
                        let mut w = String::new();
                        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                            w.push(*d);
                            chars.next();
                        }
                        spec.width = w.parse().ok();
                    }
                    if chars.peek() == Some(&'.') {
                        chars.next();
                        if chars.peek() == Some(&'*') {
                            chars.next();
                            spec.precision = Some(self.int_arg().max(0) as usize);
                        } else {
                            let mut p = String::new();
                            while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                                p.push(*d);
                                chars.next();
                            }
                            spec.precision = Some(p.parse().unwrap_or(0));
                        }
                    }
                    // Length modifiers are accepted and ignored.
                    while chars.peek().map_or(false, |m| matches!(m, 'h' | 'l' | 'L' | 'q' | 'j' | 'z' | 't')) {
                        chars.next();
                    }
                    let Some(conv) = chars.next() else {
                        return Err(ShellError::builtin("printf", "missing format character"));
                    };
                    self.convert(conv, &spec)?;
                    if self.stop {
                        return Ok(());
                    }
                }
                _ => literal.push(c),
            }
        }
        self.out.push_str(&expand_escapes(&literal, true).text);
        Ok(())
    }
}

/// `printf format [arg...]`: the format is reused while arguments remain.
pub fn printf(_shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let mut operands = &args[1..];
    if operands.first().map(String::as_str) == Some("--") {
        operands = &operands[1..];
    }
    let Some((format, rest)) = operands.split_first() else {
        return Err(ShellError::builtin("printf", "usage: printf format [arg ...]").into());
    };
    let mut state = Printf {
        args: rest,
        next: 0,
        out: String::new(),
        status: 0,
        stop: false,
    };
    let result = loop {
        let before = state.next;
        if let Err(e) = state.run(format) {
            break Err(e);
        }
        if state.stop || state.next >= rest.len() || state.next == before {
            break Ok(());
        }
    };
    print("printf", &state.out)?;
    result?;
    Ok(state.status)
}

/// Splits a line read by `read` into at most `count` fields. Escaped bytes
/// never separate fields; the last field takes the rest of the line.
fn read_fields(line: &[u8], escaped: &[bool], ifs: &str, count: usize) -> Vec<String> {
    let is_ifs = |i: usize| !escaped[i] && ifs.as_bytes().contains(&line[i]);
    let is_ws = |i: usize| is_ifs(i) && matches!(line[i], b' ' | b'\t' | b'\n');
    let text = |from: usize, to: usize| String::from_utf8_lossy(&line[from..to]).into_owned();
    let n = line.len();
    let mut i = 0;
    while i < n && is_ws(i) {
        i += 1;
    }
    let mut fields = Vec::new();
    while fields.len() + 1 < count && i < n {
        let start = i;
        while i < n && !is_ifs(i) {
            i += 1;
        }
        fields.push(text(start, i));
        while i < n && is_ws(i) {
            i += 1;
        }
        if i < n && is_ifs(i) {
            i += 1;
            while i < n && is_ws(i) {
                i += 1;
            }
        }
    }
    if fields.len() < count && i < n {
        let mut end = n;
        while end > i && is_ws(end - 1) {
            end -= 1;
        }
        fields.push(text(i, end));
    }
    fields
}

#[derive(Default)]
struct ReadOptions {
    raw: bool,
    silent: bool,
    prompt: Option<String>,
    timeout: Option<Duration>,
    nchars: Option<usize>,
    delim: u8,
    fd: i32,
}

fn read_options(args: &[String]) -> Result<(ReadOptions, &[String]), ShellError> {
    let mut opts = ReadOptions {
        delim: b'\n',
        ..ReadOptions::default()
    };
    let mut i = 1;
    while let Some(arg) = args.get(i) {
        if arg == "--" {
            i += 1;
            break;
        }
        let Some(letters) = arg.strip_prefix('-').filter(|l| !l.is_empty()) else {
            break;
        };
        i += 1;
        for (pos, c) in letters.char_indices() {
            match c {
                'r' => opts.raw = true,
                's' => opts.silent = true,
                'p' | 't' | 'n' | 'd' | 'u' => {
                    let inline = &letters[pos + 1..];
                    let value = if !inline.is_empty() {
                        inline.to_string()
                    } else {
                        let v = args
                            .get(i)
                            .ok_or_else(|| ShellError::builtin("read", format!("-{}: option requires an argument", c)))?;
                        i += 1;
                        v.clone()
                    };
                    let bad = || ShellError::builtin("read", format!("{}: invalid argument", value));
                    match c {
                        'p' => opts.prompt = Some(value.clone()),
                        't' => {
                            let secs: f64 = value.parse().map_err(|_| bad())?;
                            if secs < 0.0 {
                                return Err(bad());
                            }
                            opts.timeout = Some(Duration::from_secs_f64(secs));
                        }
                        'n' => opts.nchars = Some(value.parse().map_err(|_| bad())?),
                        'd' => opts.delim = value.bytes().next().unwrap_or(0),
                        _ => opts.fd = value.parse().map_err(|_| bad())?,
                    }
                    break;
                }
                other => return Err(ShellError::builtin("read", format!("Illegal option -{}", other))),
            }
        }
    }
    Ok((opts, &args[i..]))
}

/// How a `read` ended.
enum ReadEnd {
    Delimiter,
    Eof,
    TimedOut,
    Signal(i32),
}

fn read_line(shell: &mut Shell, opts: &ReadOptions, line: &mut Vec<u8>, escaped: &mut Vec<bool>) -> ExecuteResult<ReadEnd> {
    let deadline = opts.timeout.map(|t| Instant::now() + t);
    let mut pending_backslash = false;
    let mut byte = [0u8; 1];
    loop {
        if opts.nchars.map_or(false, |n| line.len() >= n) {
            return Ok(ReadEnd::Delimiter);
        }
        if let Some(deadline) = deadline {
            let left = deadline.saturating_duration_since(Instant::now());
            match sys::poll_readable(opts.fd, left.as_millis().min(i32::MAX as u128) as i32) {
                Ok(true) => {}
                Ok(false) => return Ok(ReadEnd::TimedOut),
                Err(Errno::EINTR) => {
                    if let Some(sig) = shell.service_signals()? {
                        return Ok(ReadEnd::Signal(sig));
                    }
                    continue;
                }
                Err(e) => return Err(ShellError::builtin("read", format!("read error: {}", e.desc())).into()),
            }
        }
        match sys::read(opts.fd, &mut byte) {
            Ok(0) => return Ok(ReadEnd::Eof),
            Ok(_) => {}
            Err(Errno::EINTR) => {
                if let Some(sig) = shell.service_signals()? {
                    return Ok(ReadEnd::Signal(sig));
                }
                continue;
            }
            Err(e) => return Err(ShellError::builtin("read", format!("read error: {}", e.desc())).into()),
        }
        let b = byte[0];
        if pending_backslash {
            pending_backslash = false;
            if b != b'\n' {
                line.push(b);
                escaped.push(true);
            }
            continue;
        }
        if b == b'\\' && !opts.raw {
            pending_backslash = true;
            continue;
        }
        if b == opts.delim {
            return Ok(ReadEnd::Delimiter);
        }
        line.push(b);
        escaped.push(false);
    }
}

/// `read [-rs] [-p prompt] [-t secs] [-n count] [-d delim] [-u fd] [name...]`
pub fn read(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (opts, names) = read_options(args)?;
    if let Some(bad) = names.iter().find(|n| !is_name(n)) {
        return Err(ShellError::BadName(bad.clone()).in_builtin("read").into());
    }
    if !sys::is_open(opts.fd) {
        return Err(ShellError::BadFd(opts.fd.to_string()).into());
    }
    let terminal = sys::isatty(opts.fd);
    if let Some(prompt) = opts.prompt.as_deref().filter(|_| terminal) {
        let _ = sys::write_all(2, prompt.as_bytes());
    }
    let saved = if opts.silent && terminal {
        sys::disable_echo(opts.fd).ok()
    } else {
        None
    };
    let mut line = Vec::new();
    let mut escaped = Vec::new();
    let end = read_line(shell, &opts, &mut line, &mut escaped);
    if let Some(saved) = saved {
        sys::restore_terminal(opts.fd, &saved);
        let _ = sys::write_all(2, b"\n");
    }
    let status = match end? {
        ReadEnd::Delimiter => 0,
        ReadEnd::Eof => 1,
        ReadEnd::TimedOut => 128 + libc::SIGALRM,
        ReadEnd::Signal(sig) => return Ok(128 + sig),
    };

    if names.is_empty() {
        shell.set_var("REPLY", &String::from_utf8_lossy(&line))?;
        return Ok(status);
    }
    let ifs = shell.get_var("IFS").unwrap_or_else(|| " \t\n".to_string());
    let fields = read_fields(&line, &escaped, &ifs, names.len());
    for (i, name) in names.iter().enumerate() {
        let value = fields.get(i).map_or("", String::as_str);
        if let Err(e) = shell.set_var(name, value) {
            warn(shell, "read", e.to_string());
            return Ok(2);
        }
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(line: &str, ifs: &str, count: usize) -> Vec<String> {
        let escaped = vec![false; line.len()];
        read_fields(line.as_bytes(), &escaped, ifs, count)
    }

    #[test]
    fn test_read_fields_last_takes_rest() {
        assert_eq!(fields("  a b  c d  ", " \t\n", 2), vec!["a", "b  c d"]);
        assert_eq!(fields("one", " \t\n", 3), vec!["one"]);
        assert_eq!(fields("a:b::c", ":", 4), vec!["a", "b", "", "c"]);
        assert_eq!(fields(" a : b ", " :", 2), vec!["a", "b"]);
    }

    #[test]
    fn test_read_fields_respects_escapes() {
        let line = b"a b c";
        let escaped = [false, true, false, false, false];
        assert_eq!(read_fields(line, &escaped, " ", 2), vec!["a b", "c"]);
    }

    #[test]
    fn test_escapes() {
        assert_eq!(expand_escapes(r"a\tb\n", false).text, "a\tb\n");
        assert_eq!(expand_escapes(r"\0101\x42", false).text, "AB");
        assert_eq!(expand_escapes(r"\101", true).text, "A");
        let stopped = expand_escapes(r"ab\cde", false);
        assert!(stopped.stop);
        assert_eq!(stopped.text, "ab");
    }

    fn printf_text(format: &str, args: &[&str]) -> Result<String, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let mut state = Printf {
            args: &args,
            next: 0,
            out: String::new(),
            status: 0,
            stop: false,
        };
        loop {
            let before = state.next;
            state.run(format).map_err(|e| e.to_string())?;
            if state.stop || state.next >= args.len() || state.next == before {
                break;
            }
        }
        Ok(state.out)
    }

    #[test]
    fn test_printf_conversions() -> Result<(), String> {
        let cases: &[(&str, &[&str], &str)] = &[
            ("%s-%s\n", &["a", "b"], "a-b\n"),
            ("%5s|%-5s|", &["ab", "cd"], "   ab|cd   |"),
            ("%.2s", &["abcdef"], "ab"),
            ("%d %i", &["42", "-7"], "42 -7"),
            ("%05d|%+d", &["42", "3"], "00042|+3"),
            ("%x %X %o %#x", &["255", "255", "8", "255"], "ff FF 10 0xff"),
            ("%c", &["hello"], "h"),
            ("%.3f", &["3.14159"], "3.142"),
            ("%e", &["1500"], "1.500000e+03"),
            ("%g %g", &["0.0001", "123456789"], "0.0001 1.23457e+08"),
            ("%d", &["'A"], "65"),
            ("%b", &[r"x\ty"], "x\ty"),
            ("%s\n", &["a", "b", "c"], "a\nb\nc\n"),
            ("100%%", &[], "100%"),
            ("%s|", &[], "|"),
        ];
        for (format, args, expected) in cases {
            let got = printf_text(format, args)?;
            if got != *expected {
                return Err(format!("printf {:?} {:?}: expected {:?}, got {:?}", format, args, expected, got));
            }
        }
        Ok(())
    }
}
