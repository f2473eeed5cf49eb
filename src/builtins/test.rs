//! `test`, `[` and the `[[ ]]` conditional command.

use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use nix::unistd::{self, AccessFlags};
use regex::Regex;

use crate::arith;
use crate::pattern::Pattern;
use crate::shell::Shell;
use crate::sys;
use crate::types::{ExecuteResult, ShellError};
use crate::word::Word;

const UNARY: &[&str] = &[
    "-a", "-b", "-c", "-d", "-e", "-f", "-g", "-G", "-h", "-k", "-L", "-n", "-O", "-p", "-r", "-s", "-S",
    "-t", "-u", "-w", "-x", "-z",
];

const BINARY: &[&str] = &[
    "=", "==", "!=", "<", ">", "-eq", "-ne", "-lt", "-le", "-gt", "-ge", "-nt", "-ot", "-ef",
];

fn is_unary(op: &str) -> bool {
    UNARY.contains(&op)
}

fn is_binary(op: &str) -> bool {
    BINARY.contains(&op)
}

fn access(path: &str, mode: AccessFlags) -> bool {
    unistd::access(path, mode).is_ok()
}

fn file_test(path: &str, check: impl Fn(&Metadata) -> bool) -> bool {
    fs::metadata(path).map_or(false, |m| check(&m))
}

/// File and string tests taking one operand.
fn unary(op: &str, arg: &str) -> bool {
    match op {
        "-n" => !arg.is_empty(),
        "-z" => arg.is_empty(),
        "-a" | "-e" => fs::metadata(arg).is_ok(),
        "-b" => file_test(arg, |m| m.file_type().is_block_device()),
        "-c" => file_test(arg, |m| m.file_type().is_char_device()),
        "-d" => file_test(arg, Metadata::is_dir),
        "-f" => file_test(arg, Metadata::is_file),
        "-g" => file_test(arg, |m| m.mode() & 0o2000 != 0),
        "-u" => file_test(arg, |m| m.mode() & 0o4000 != 0),
        "-k" => file_test(arg, |m| m.mode() & 0o1000 != 0),
        "-G" => file_test(arg, |m| m.gid() == unistd::getegid().as_raw()),
        "-O" => file_test(arg, |m| m.uid() == unistd::geteuid().as_raw()),
        "-h" | "-L" => fs::symlink_metadata(arg).map_or(false, |m| m.file_type().is_symlink()),
        "-p" => file_test(arg, |m| m.file_type().is_fifo()),
        "-S" => file_test(arg, |m| m.file_type().is_socket()),
        "-s" => file_test(arg, |m| m.len() > 0),
        "-r" => access(arg, AccessFlags::R_OK),
        "-w" => access(arg, AccessFlags::W_OK),
        "-x" => access(arg, AccessFlags::X_OK),
        "-t" => arg.trim().parse::<i32>().map_or(false, sys::isatty),
        _ => false,
    }
}

fn number(name: &str, text: &str) -> Result<i64, ShellError> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix(['-', '+']).unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ShellError::builtin(name, format!("{}: bad number", text)));
    }
    trimmed
        .parse()
        .map_err(|_| ShellError::builtin(name, format!("{}: out of range", text)))
}

fn compare_ints(op: &str, a: i64, b: i64) -> bool {
    match op {
        "-eq" => a == b,
        "-ne" => a != b,
        "-lt" => a < b,
        "-le" => a <= b,
        "-gt" => a > b,
        _ => a >= b,
    }
}

fn mtime(path: &str) -> Option<(i64, i64)> {
    fs::metadata(path).ok().map(|m| (m.mtime(), m.mtime_nsec()))
}

/// Comparisons other than the integer ones.
fn compare_files_or_strings(lhs: &str, op: &str, rhs: &str) -> bool {
    match op {
        "=" | "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "<" => lhs < rhs,
        ">" => lhs > rhs,
        "-nt" => match (mtime(lhs), mtime(rhs)) {
            (Some(a), Some(b)) => a > b,
            (Some(_), None) => true,
            _ => false,
        },
        "-ot" => match (mtime(lhs), mtime(rhs)) {
            (Some(a), Some(b)) => a < b,
            (None, Some(_)) => true,
            _ => false,
        },
        "-ef" => match (fs::metadata(lhs), fs::metadata(rhs)) {
            (Ok(a), Ok(b)) => a.dev() == b.dev() && a.ino() == b.ino(),
            _ => false,
        },
        _ => false,
    }
}

fn binary(name: &str, lhs: &str, op: &str, rhs: &str) -> Result<bool, ShellError> {
    match op {
        "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
            Ok(compare_ints(op, number(name, lhs)?, number(name, rhs)?))
        }
        _ => Ok(compare_files_or_strings(lhs, op, rhs)),
    }
}

/// Recursive-descent evaluator for `test` operands beyond the fixed
/// argument-count forms.
struct TestParser<'a> {
    name: &'a str,
    args: &'a [String],
    pos: usize,
}

impl<'a> TestParser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.args.get(self.pos).map(String::as_str)
    }

    fn next(&mut self) -> Result<&'a str, ShellError> {
        let arg = self
            .peek()
            .ok_or_else(|| ShellError::builtin(self.name, "argument expected"))?;
        self.pos += 1;
        Ok(arg)
    }

    fn or(&mut self) -> Result<bool, ShellError> {
        let mut value = self.and()?;
        while self.peek() == Some("-o") {
            self.pos += 1;
            let rhs = self.and()?;
            value = value || rhs;
        }
        Ok(value)
    }

    fn and(&mut self) -> Result<bool, ShellError> {
        let mut value = self.not()?;
        while self.peek() == Some("-a") {
            self.pos += 1;
            let rhs = self.not()?;
            value = value && rhs;
        }
        Ok(value)
    }

    fn not(&mut self) -> Result<bool, ShellError> {
        if self.peek() == Some("!") && self.pos + 1 < self.args.len() {
            self.pos += 1;
            return Ok(!self.not()?);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<bool, ShellError> {
        let first = self.next()?;
        let following = self.peek();
        if let Some(op) = following.filter(|op| is_binary(op)) {
            if self.pos + 1 < self.args.len() {
                self.pos += 1;
                let rhs = self.next()?;
                return binary(self.name, first, op, rhs);
            }
        }
        if first == "(" {
            let value = self.or()?;
            if self.next()? != ")" {
                return Err(ShellError::builtin(self.name, "closing paren expected"));
            }
            return Ok(value);
        }
        if is_unary(first) && following.is_some() {
            let arg = self.next()?;
            return Ok(unary(first, arg));
        }
        Ok(!first.is_empty())
    }
}

/// Evaluates `test` operands, using the POSIX rules for up to four
/// arguments.
fn evaluate(name: &str, args: &[String]) -> Result<bool, ShellError> {
    let arg = |i: usize| args[i].as_str();
    match args.len() {
        0 => return Ok(false),
        1 => return Ok(!arg(0).is_empty()),
        2 if arg(0) == "!" => return Ok(arg(1).is_empty()),
        2 if is_unary(arg(0)) => return Ok(unary(arg(0), arg(1))),
        2 => return Err(ShellError::builtin(name, format!("{}: unexpected operator", arg(0)))),
        3 if is_binary(arg(1)) => return binary(name, arg(0), arg(1), arg(2)),
        3 if arg(0) == "!" => return evaluate(name, &args[1..]).map(|v| !v),
        3 if arg(0) == "(" && arg(2) == ")" => return Ok(!arg(1).is_empty()),
        4 if arg(0) == "!" => return evaluate(name, &args[1..]).map(|v| !v),
        4 if arg(0) == "(" && arg(3) == ")" => return evaluate(name, &args[1..3]),
        _ => {}
    }
    let mut parser = TestParser { name, args, pos: 0 };
    let value = parser.or()?;
    match parser.peek() {
        None => Ok(value),
        Some(extra) => Err(ShellError::builtin(name, format!("{}: unexpected operator", extra))),
    }
}

/// `test expr` and `[ expr ]`.
pub fn test(_shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let name = args[0].as_str();
    let mut operands = &args[1..];
    if name == "[" {
        match operands.split_last() {
            Some((last, rest)) if last == "]" => operands = rest,
            _ => return Err(ShellError::builtin(name, "missing ]").into()),
        }
    }
    let value = evaluate(name, operands)?;
    Ok(if value { 0 } else { 1 })
}

/// Parsed `[[ ]]` expression. Operands stay unexpanded until evaluated, so
/// `&&` and `||` short-circuit expansions too.
enum Cond<'w> {
    Not(Box<Cond<'w>>),
    And(Box<Cond<'w>>, Box<Cond<'w>>),
    Or(Box<Cond<'w>>, Box<Cond<'w>>),
    Unary(&'w str, &'w Word),
    Binary(&'w Word, &'w str, &'w Word),
    Single(&'w Word),
}

struct CondParser<'w> {
    words: &'w [Word],
    pos: usize,
}

fn cond_syntax(message: impl Into<String>) -> ShellError {
    ShellError::builtin("[[", message)
}

impl<'w> CondParser<'w> {
    fn peek_op(&self) -> Option<&'w str> {
        self.words.get(self.pos).and_then(Word::as_literal)
    }

    fn next(&mut self) -> Result<&'w Word, ShellError> {
        let word = self
            .words
            .get(self.pos)
            .ok_or_else(|| cond_syntax("unexpected end of expression"))?;
        self.pos += 1;
        Ok(word)
    }

    fn or(&mut self) -> Result<Cond<'w>, ShellError> {
        let mut node = self.and()?;
        while self.peek_op() == Some("||") {
            self.pos += 1;
            node = Cond::Or(Box::new(node), Box::new(self.and()?));
        }
        Ok(node)
    }

    fn and(&mut self) -> Result<Cond<'w>, ShellError> {
        let mut node = self.not()?;
        while self.peek_op() == Some("&&") {
            self.pos += 1;
            node = Cond::And(Box::new(node), Box::new(self.not()?));
        }
        Ok(node)
    }

    fn not(&mut self) -> Result<Cond<'w>, ShellError> {
        if self.peek_op() == Some("!") {
            self.pos += 1;
            return Ok(Cond::Not(Box::new(self.not()?)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Cond<'w>, ShellError> {
        if self.peek_op() == Some("(") {
            self.pos += 1;
            let inner = self.or()?;
            if self.peek_op() != Some(")") {
                return Err(cond_syntax("expected `)'"));
            }
            self.pos += 1;
            return Ok(inner);
        }
        let first = self.next()?;
        let op = self.peek_op().filter(|op| is_binary(op) || *op == "=~");
        if let Some(op) = op {
            self.pos += 1;
            let rhs = self.next()?;
            return Ok(Cond::Binary(first, op, rhs));
        }
        if let Some(op) = first.as_literal().filter(|op| is_unary(op)) {
            if self.pos < self.words.len() && !matches!(self.peek_op(), Some("&&" | "||" | ")")) {
                let arg = self.next()?;
                return Ok(Cond::Unary(op, arg));
            }
        }
        Ok(Cond::Single(first))
    }
}

impl Shell {
    fn eval_cond(&mut self, cond: &Cond<'_>) -> ExecuteResult<bool> {
        Ok(match cond {
            Cond::Not(inner) => !self.eval_cond(inner)?,
            Cond::And(a, b) => self.eval_cond(a)? && self.eval_cond(b)?,
            Cond::Or(a, b) => self.eval_cond(a)? || self.eval_cond(b)?,
            Cond::Single(word) => !self.expand_word(word)?.is_empty(),
            Cond::Unary(op, word) => {
                let arg = self.expand_word(word)?;
                unary(op, &arg)
            }
            Cond::Binary(lhs, op, rhs) => {
                let left = self.expand_word(lhs)?;
                match *op {
                    "=" | "==" | "!=" => {
                        let pattern = self.expand_pattern(rhs)?;
                        Pattern::new(&pattern).matches(&left) == (*op != "!=")
                    }
                    "=~" => {
                        let right = self.expand_word(rhs)?;
                        let re = Regex::new(&right)
                            .map_err(|_| cond_syntax(format!("{}: invalid regular expression", right)))?;
                        re.is_match(&left)
                    }
                    "-eq" | "-ne" | "-lt" | "-le" | "-gt" | "-ge" => {
                        let right = self.expand_word(rhs)?;
                        let a = arith::eval(&left, self)?;
                        let b = arith::eval(&right, self)?;
                        compare_ints(op, a, b)
                    }
                    _ => {
                        let right = self.expand_word(rhs)?;
                        compare_files_or_strings(&left, op, &right)
                    }
                }
            }
        })
    }
}

/// `[[ expr ]]`, given the words between the brackets.
pub fn double_bracket(shell: &mut Shell, words: &[Word]) -> ExecuteResult<i32> {
    let mut parser = CondParser { words, pos: 0 };
    let parsed = parser.or().and_then(|cond| match parser.words.get(parser.pos) {
        None => Ok(cond),
        Some(word) => Err(cond_syntax(format!("unexpected `{}'", word.unquoted_text()))),
    });
    let cond = match parsed {
        Ok(cond) => cond,
        Err(e) => {
            shell.report(&e);
            return Ok(2);
        }
    };
    match shell.eval_cond(&cond) {
        Ok(value) => Ok(if value { 0 } else { 1 }),
        Err(crate::types::Exception::Error(e @ (ShellError::Builtin { .. } | ShellError::Arithmetic(_)))) => {
            shell.report(&e);
            Ok(2)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fixed_argument_forms() -> Result<(), String> {
        let cases: &[(&[&str], bool)] = &[
            (&[], false),
            (&[""], false),
            (&["x"], true),
            (&["!", ""], true),
            (&["-n", ""], false),
            (&["-z", ""], true),
            (&["a", "=", "a"], true),
            (&["a", "!=", "a"], false),
            (&["!", "a", "=", "b"], true),
            (&["(", "x", ")"], true),
            (&["-d", "/"], true),
            (&["-f", "/"], false),
            (&["3", "-lt", "10"], true),
            (&["10", "-le", "3"], false),
            (&[" 7 ", "-eq", "7"], true),
        ];
        for (input, expected) in cases {
            let got = evaluate("test", &args(input)).map_err(|e| e.to_string())?;
            if got != *expected {
                return Err(format!("test {:?}: expected {}, got {}", input, expected, got));
            }
        }
        Ok(())
    }

    #[test]
    fn test_and_or_precedence() -> Result<(), String> {
        // -a binds tighter than -o
        let v = evaluate("test", &args(&["x", "-o", "", "-a", ""])).map_err(|e| e.to_string())?;
        assert!(v);
        let v = evaluate("test", &args(&["(", "x", "-o", "", ")", "-a", ""])).map_err(|e| e.to_string())?;
        assert!(!v);
        let v = evaluate("test", &args(&["!", "-z", "a", "-a", "-n", "b"])).map_err(|e| e.to_string())?;
        assert!(v);
        Ok(())
    }

    #[test]
    fn test_bad_number_is_an_error() {
        let err = evaluate("test", &args(&["abc", "-eq", "1"])).unwrap_err();
        assert_eq!(err.to_string(), "test: abc: bad number");
        assert_eq!(err.exit_status(), 2);
    }

    #[test]
    fn test_file_comparisons() -> Result<(), String> {
        let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        fs::write(&old, "a").map_err(|e| e.to_string())?;
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(100);
        fs::File::options()
            .write(true)
            .open(&old)
            .and_then(|f| f.set_modified(past))
            .map_err(|e| e.to_string())?;
        fs::write(&new, "").map_err(|e| e.to_string())?;
        let (o, n) = (old.display().to_string(), new.display().to_string());
        assert!(compare_files_or_strings(&n, "-nt", &o));
        assert!(compare_files_or_strings(&o, "-ot", &n));
        assert!(compare_files_or_strings(&o, "-ef", &o));
        assert!(unary("-s", &o));
        assert!(!unary("-s", &n));
        Ok(())
    }
}
