//! Word expansion: tilde, parameter, command and arithmetic expansion,
//! field splitting, pathname expansion and quote removal.

use nix::unistd::User;

use crate::arena::{self, Cell, ExpandBuf, Ifs, QUOTED, SPLIT};
use crate::arith;
use crate::glob;
use crate::options::Opt;
use crate::pattern::Pattern;
use crate::shell::Shell;
use crate::types::{ExecuteResult, ShellError};
use crate::utils::is_name;
use crate::word::{ParamExp, ParamOp, ReplaceMode, Word, WordPart};

/// How the text being expanded will be used.
#[derive(Debug, Clone, Copy, Default)]
struct Ctx {
    /// Inside double quotes (or a context that behaves like them).
    quoted: bool,
    /// Results of unquoted expansions are subject to field splitting.
    split: bool,
    /// Right-hand side of an assignment: `~` also expands after `:`.
    assign: bool,
}

impl Ctx {
    fn flags(&self) -> u8 {
        if self.quoted {
            QUOTED
        } else if self.split {
            SPLIT
        } else {
            0
        }
    }
}

enum Value {
    Unset,
    Str(String),
    /// `$@` / `$*`.
    List(Vec<String>),
}

impl Value {
    fn is_set(&self) -> bool {
        match self {
            Value::Unset => false,
            Value::Str(_) => true,
            Value::List(items) => !items.is_empty(),
        }
    }

    fn is_null(&self) -> bool {
        match self {
            Value::Unset => true,
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.iter().all(|s| s.is_empty()),
        }
    }
}

/// True when a double-quoted span contains `$@`, which may expand to no
/// fields at all.
fn has_at(parts: &[WordPart]) -> bool {
    parts
        .iter()
        .any(|p| matches!(p, WordPart::Param(pe) if pe.name == "@"))
}

impl Shell {
    /// Full expansion of command arguments: splitting and globbing included.
    pub fn expand_args(&mut self, words: &[Word]) -> ExecuteResult<Vec<String>> {
        let mut out = Vec::new();
        for word in words {
            self.expand_fields(word, &mut out)?;
        }
        Ok(out)
    }

    fn expand_fields(&mut self, word: &Word, out: &mut Vec<String>) -> ExecuteResult<()> {
        let mut buf = ExpandBuf::new();
        let ctx = Ctx {
            split: true,
            ..Ctx::default()
        };
        self.expand_parts(&mut buf, &word.parts, ctx, true)?;
        let ifs = Ifs::new(self.get_var("IFS").as_deref());
        let noglob = self.options.get(Opt::NoGlob);
        for field in arena::split_fields(buf.cells(), &ifs) {
            if !noglob && arena::has_glob_meta(&field) {
                let matches = glob::expand(&arena::pattern_of(&field));
                if !matches.is_empty() {
                    out.extend(matches);
                    continue;
                }
            }
            out.push(arena::text_of(&field));
        }
        Ok(())
    }

    /// Expansion to a single string with no splitting or globbing.
    pub fn expand_word(&mut self, word: &Word) -> ExecuteResult<String> {
        let mut buf = ExpandBuf::new();
        self.expand_parts(&mut buf, &word.parts, Ctx::default(), true)?;
        Ok(arena::text_of(buf.cells()))
    }

    /// Expansion of an assignment value.
    pub fn expand_assign(&mut self, word: &Word) -> ExecuteResult<String> {
        let mut buf = ExpandBuf::new();
        let ctx = Ctx {
            assign: true,
            ..Ctx::default()
        };
        self.expand_parts(&mut buf, &word.parts, ctx, true)?;
        Ok(arena::text_of(buf.cells()))
    }

    /// Expansion to a pattern string: quoted characters are escaped.
    pub fn expand_pattern(&mut self, word: &Word) -> ExecuteResult<String> {
        let mut buf = ExpandBuf::new();
        let mark = buf.mark();
        self.expand_parts(&mut buf, &word.parts, Ctx::default(), true)?;
        Ok(buf.pattern_since(mark))
    }

    /// Expansion of a here-document body or prompt string.
    pub fn expand_quoted(&mut self, word: &Word) -> ExecuteResult<String> {
        let mut buf = ExpandBuf::new();
        let ctx = Ctx {
            quoted: true,
            ..Ctx::default()
        };
        self.expand_parts(&mut buf, &word.parts, ctx, false)?;
        Ok(arena::text_of(buf.cells()))
    }

    /// Parses and expands text such as `PS1` or `ENV`.
    pub fn expand_text(&mut self, text: &str) -> ExecuteResult<String> {
        let mut parser = crate::parser::Parser::from_string(text, None);
        parser.set_posix(self.options.get(Opt::Posix));
        let word = parser.read_word(crate::tokenizer::Syntax::HereDoc, &[])?;
        self.expand_quoted(&word)
    }

    fn expand_parts(
        &mut self,
        buf: &mut ExpandBuf,
        parts: &[WordPart],
        ctx: Ctx,
        word_start: bool,
    ) -> ExecuteResult<()> {
        for (i, part) in parts.iter().enumerate() {
            match part {
                WordPart::Literal(s) => {
                    if ctx.assign && !ctx.quoted {
                        self.literal_with_tildes(buf, s, word_start && i == 0);
                    } else {
                        buf.push_str(s, if ctx.quoted { QUOTED } else { 0 });
                    }
                }
                WordPart::Escaped(c) => buf.push(Cell::Char(*c, QUOTED)),
                WordPart::SingleQuoted(s) => {
                    buf.push(Cell::Mark);
                    buf.push_str(s, QUOTED);
                }
                WordPart::DoubleQuoted(inner) => {
                    if !has_at(inner) {
                        buf.push(Cell::Mark);
                    }
                    let inner_ctx = Ctx {
                        quoted: true,
                        ..ctx
                    };
                    self.expand_parts(buf, inner, inner_ctx, false)?;
                }
                WordPart::Tilde(user) => match self.home_dir(user) {
                    Some(home) => buf.push_str(&home, QUOTED),
                    None => {
                        buf.push_str("~", QUOTED);
                        buf.push_str(user, QUOTED);
                    }
                },
                WordPart::Param(pe) => self.expand_param(buf, pe, ctx)?,
                WordPart::CommandSubst(node) => {
                    let mut out = self.command_subst(node)?;
                    let trimmed = out.trim_end_matches('\n').len();
                    out.truncate(trimmed);
                    buf.push_str(&out, ctx.flags());
                }
                WordPart::Arith(expr) => {
                    let text = self.expand_word_inner(expr)?;
                    let value = arith::eval(&text, self)?;
                    buf.push_str(&value.to_string(), ctx.flags());
                }
                WordPart::ProcSubst { output, body } => {
                    let path = self.process_subst(*output, body)?;
                    buf.push_str(&path, QUOTED);
                }
            }
        }
        Ok(())
    }

    /// Expands a nested word to text, as for arithmetic and operands of
    /// `${...}` that are used as strings.
    fn expand_word_inner(&mut self, word: &Word) -> ExecuteResult<String> {
        let mut buf = ExpandBuf::new();
        self.expand_parts(&mut buf, &word.parts, Ctx::default(), false)?;
        Ok(arena::text_of(buf.cells()))
    }

    /// Unquoted assignment text: `~` expands at the start and after each `:`.
    fn literal_with_tildes(&mut self, buf: &mut ExpandBuf, s: &str, at_start: bool) {
        let chars: Vec<char> = s.chars().collect();
        let mut i = 0;
        let mut boundary = at_start;
        while i < chars.len() {
            let c = chars[i];
            if c == '~' && boundary {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == '/' || c == ':')
                    .map_or(chars.len(), |p| i + 1 + p);
                let user: String = chars[i + 1..end].iter().collect();
                if let Some(home) = self.home_dir(&user) {
                    buf.push_str(&home, QUOTED);
                    i = end;
                    boundary = false;
                    continue;
                }
            }
            buf.push(Cell::Char(c, 0));
            boundary = c == ':';
            i += 1;
        }
    }

    pub fn home_dir(&self, user: &str) -> Option<String> {
        if user.is_empty() {
            if let Some(home) = self.get_var("HOME") {
                return Some(home);
            }
            return User::from_uid(nix::unistd::getuid())
                .ok()
                .flatten()
                .map(|u| u.dir.to_string_lossy().into_owned());
        }
        User::from_name(user)
            .ok()
            .flatten()
            .map(|u| u.dir.to_string_lossy().into_owned())
    }

    fn lookup_param(&mut self, name: &str) -> Value {
        match name {
            "@" | "*" => Value::List(self.positional.clone()),
            "#" => Value::Str(self.positional.len().to_string()),
            "?" => Value::Str(self.last_status.to_string()),
            "-" => Value::Str(self.options.letters()),
            "$" => Value::Str(self.shell_pid.to_string()),
            "!" => match self.last_bg_pid {
                Some(pid) => Value::Str(pid.to_string()),
                None => Value::Unset,
            },
            "0" => Value::Str(self.arg0.clone()),
            _ if name.bytes().all(|b| b.is_ascii_digit()) => {
                let n: usize = name.parse().unwrap_or(usize::MAX);
                match self.positional.get(n.wrapping_sub(1)) {
                    Some(v) => Value::Str(v.clone()),
                    None => Value::Unset,
                }
            }
            _ => match self.get_var(name) {
                Some(v) => Value::Str(v),
                None => Value::Unset,
            },
        }
    }

    fn check_nounset(&self, name: &str, value: &Value) -> Result<(), ShellError> {
        if self.options.get(Opt::NoUnset) && matches!(value, Value::Unset) && name != "@" && name != "*" {
            return Err(ShellError::ParameterNotSet(name.to_string()));
        }
        Ok(())
    }

    fn ifs_joiner(&self) -> String {
        match self.get_var("IFS") {
            None => " ".to_string(),
            Some(ifs) => ifs.chars().next().map(String::from).unwrap_or_default(),
        }
    }

    fn append_value(&mut self, buf: &mut ExpandBuf, name: &str, value: Value, ctx: Ctx) {
        match value {
            Value::Unset => {}
            Value::Str(s) => buf.push_str(&s, ctx.flags()),
            Value::List(items) => {
                if ctx.quoted && name == "@" && ctx.split {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            buf.push(Cell::Break);
                        }
                        buf.push(Cell::Mark);
                        buf.push_str(item, QUOTED);
                    }
                } else if !ctx.quoted && ctx.split {
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            buf.push(Cell::Sep);
                        }
                        buf.push_str(item, SPLIT);
                    }
                } else {
                    let sep = if name == "@" { " ".to_string() } else { self.ifs_joiner() };
                    buf.push_str(&items.join(&sep), ctx.flags());
                }
            }
        }
    }

    fn expand_param(&mut self, buf: &mut ExpandBuf, pe: &ParamExp, ctx: Ctx) -> ExecuteResult<()> {
        let name = pe.name.as_str();
        let value = self.lookup_param(name);
        match &pe.op {
            ParamOp::Plain => {
                self.check_nounset(name, &value)?;
                self.append_value(buf, name, value, ctx);
            }
            ParamOp::Length => {
                self.check_nounset(name, &value)?;
                let len = match &value {
                    Value::Unset => 0,
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                };
                buf.push_str(&len.to_string(), ctx.flags());
            }
            ParamOp::Default { colon, word } => {
                let missing = if *colon { value.is_null() } else { !value.is_set() };
                if missing {
                    self.expand_parts(buf, &word.parts, ctx, false)?;
                } else {
                    self.append_value(buf, name, value, ctx);
                }
            }
            ParamOp::Assign { colon, word } => {
                let missing = if *colon { value.is_null() } else { !value.is_set() };
                if missing {
                    if !is_name(name) {
                        return Err(ShellError::Parameter {
                            name: name.to_string(),
                            message: "cannot assign in this way".into(),
                        }
                        .into());
                    }
                    let text = self.expand_word_inner(word)?;
                    self.set_var(name, &text)?;
                    buf.push_str(&text, ctx.flags());
                } else {
                    self.append_value(buf, name, value, ctx);
                }
            }
            ParamOp::Error { colon, word } => {
                let missing = if *colon { value.is_null() } else { !value.is_set() };
                if missing {
                    let err = match word {
                        Some(w) => ShellError::Parameter {
                            name: name.to_string(),
                            message: self.expand_word_inner(w)?,
                        },
                        None if *colon => ShellError::ParameterNull(name.to_string()),
                        None => ShellError::ParameterNotSet(name.to_string()),
                    };
                    return Err(err.into());
                }
                self.append_value(buf, name, value, ctx);
            }
            ParamOp::Alternate { colon, word } => {
                let present = if *colon { !value.is_null() } else { value.is_set() };
                if present {
                    self.expand_parts(buf, &word.parts, ctx, false)?;
                } else if ctx.quoted {
                    buf.push(Cell::Mark);
                }
            }
            ParamOp::TrimPrefix { longest, pattern } | ParamOp::TrimSuffix { longest, pattern } => {
                self.check_nounset(name, &value)?;
                let prefix = matches!(pe.op, ParamOp::TrimPrefix { .. });
                let pat = Pattern::new(&self.expand_pattern(pattern)?);
                let trim = |s: &str| -> String {
                    let chars: Vec<char> = s.chars().collect();
                    if prefix {
                        match pat.match_prefix(s, *longest) {
                            Some(n) => chars[n..].iter().collect(),
                            None => s.to_string(),
                        }
                    } else {
                        match pat.match_suffix(s, *longest) {
                            Some(n) => chars[..chars.len() - n].iter().collect(),
                            None => s.to_string(),
                        }
                    }
                };
                let value = match value {
                    Value::Str(s) => Value::Str(trim(&s)),
                    Value::List(items) => Value::List(items.iter().map(|s| trim(s)).collect()),
                    Value::Unset => Value::Unset,
                };
                self.append_value(buf, name, value, ctx);
            }
            ParamOp::Substring { offset, length } => {
                self.check_nounset(name, &value)?;
                let offset_text = self.expand_word_inner(offset)?;
                let offset = arith::eval(&offset_text, self)?;
                let length = match length {
                    Some(w) => {
                        let text = self.expand_word_inner(w)?;
                        Some(arith::eval(&text, self)?)
                    }
                    None => None,
                };
                let value = match value {
                    Value::Unset => Value::Unset,
                    Value::Str(s) => {
                        let chars: Vec<char> = s.chars().collect();
                        let (start, end) = substring_range(chars.len(), offset, length)?;
                        Value::Str(chars[start..end].iter().collect())
                    }
                    Value::List(items) => {
                        let mut full = Vec::with_capacity(items.len() + 1);
                        full.push(self.arg0.clone());
                        full.extend(items);
                        let (start, end) = substring_range(full.len(), offset, length)?;
                        Value::List(full[start..end].to_vec())
                    }
                };
                self.append_value(buf, name, value, ctx);
            }
            ParamOp::Replace {
                mode,
                pattern,
                replacement,
            } => {
                self.check_nounset(name, &value)?;
                let pat_text = self.expand_pattern(pattern)?;
                let repl = self.expand_word_inner(replacement)?;
                let pat = Pattern::new(&pat_text);
                let replace = |s: &str| -> String {
                    if pat_text.is_empty() {
                        return s.to_string();
                    }
                    replace_pattern(&pat, s, *mode, &repl)
                };
                let value = match value {
                    Value::Str(s) => Value::Str(replace(&s)),
                    Value::List(items) => Value::List(items.iter().map(|s| replace(s)).collect()),
                    Value::Unset => Value::Unset,
                };
                self.append_value(buf, name, value, ctx);
            }
        }
        Ok(())
    }
}

fn substring_range(len: usize, offset: i64, length: Option<i64>) -> Result<(usize, usize), ShellError> {
    let len_i = len as i64;
    let start = if offset < 0 { (len_i + offset).max(0) } else { offset.min(len_i) };
    let end = match length {
        None => len_i,
        Some(l) if l < 0 => {
            let end = len_i + l;
            if end < start {
                return Err(ShellError::Arithmetic(format!("{}: substring expression < 0", l)));
            }
            end
        }
        Some(l) => (start + l).min(len_i),
    };
    Ok((start as usize, end.max(start) as usize))
}

fn replace_pattern(pat: &Pattern, s: &str, mode: ReplaceMode, repl: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    match mode {
        ReplaceMode::Prefix => match pat.match_prefix(s, true) {
            Some(n) => format!("{}{}", repl, chars[n..].iter().collect::<String>()),
            None => s.to_string(),
        },
        ReplaceMode::Suffix => match pat.match_suffix(s, true) {
            Some(n) => format!("{}{}", chars[..chars.len() - n].iter().collect::<String>(), repl),
            None => s.to_string(),
        },
        ReplaceMode::First | ReplaceMode::All => {
            let mut out = String::new();
            let mut pos = 0;
            while let Some((start, end)) = pat.find(&chars, pos) {
                out.extend(&chars[pos..start]);
                out.push_str(repl);
                pos = end;
                if mode == ReplaceMode::First {
                    break;
                }
            }
            out.extend(&chars[pos..]);
            out
        }
    }
}

impl arith::ArithEnv for Shell {
    fn get_var(&mut self, name: &str) -> Result<Option<String>, ShellError> {
        let value = Shell::get_var(self, name);
        if value.is_none() && self.options.get(Opt::NoUnset) {
            return Err(ShellError::ParameterNotSet(name.to_string()));
        }
        Ok(value)
    }

    fn set_var(&mut self, name: &str, value: i64) -> Result<(), ShellError> {
        Shell::set_var(self, name, &value.to_string())
    }
}
