use std::fmt;

use crate::ast::Node;

/// One piece of a word as written in the source, before expansion.
#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    /// Unquoted text. May contain pattern characters.
    Literal(String),
    /// A backslash-escaped character outside quotes.
    Escaped(char),
    SingleQuoted(String),
    DoubleQuoted(Vec<WordPart>),
    /// `~` or `~user` at the start of a word (or after `:` in an assignment).
    Tilde(String),
    Param(Box<ParamExp>),
    /// `$(...)` or `` `...` ``.
    CommandSubst(Box<Node>),
    /// `$((...))`; the inner word is expanded to a string and then evaluated.
    Arith(Word),
    /// `<(...)` (`output == false`) or `>(...)`.
    ProcSubst { output: bool, body: Box<Node> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamExp {
    pub name: String,
    pub op: ParamOp,
    /// Written with braces. Only matters for display.
    pub braced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
    First,
    All,
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParamOp {
    Plain,
    Length,
    Default { colon: bool, word: Word },
    Assign { colon: bool, word: Word },
    Error { colon: bool, word: Option<Word> },
    Alternate { colon: bool, word: Word },
    TrimPrefix { longest: bool, pattern: Word },
    TrimSuffix { longest: bool, pattern: Word },
    Substring { offset: Word, length: Option<Word> },
    Replace {
        mode: ReplaceMode,
        pattern: Word,
        replacement: Word,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Word {
    pub parts: Vec<WordPart>,
}

impl Word {
    pub fn new() -> Self {
        Self { parts: Vec::new() }
    }

    pub fn literal(s: &str) -> Self {
        let mut w = Word::new();
        w.push_str(s);
        w
    }

    pub fn add_part(&mut self, part: WordPart) {
        self.parts.push(part);
    }

    pub fn push_str(&mut self, s: &str) {
        if let Some(WordPart::Literal(last)) = self.parts.last_mut() {
            last.push_str(s);
        } else {
            self.add_part(WordPart::Literal(s.to_string()));
        }
    }

    pub fn push_char(&mut self, c: char) {
        if let Some(WordPart::Literal(last)) = self.parts.last_mut() {
            last.push(c);
        } else {
            self.add_part(WordPart::Literal(c.to_string()));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// The text of a word made only of unquoted literal characters.
    pub fn as_literal(&self) -> Option<&str> {
        match self.parts.as_slice() {
            [WordPart::Literal(s)] => Some(s),
            _ => None,
        }
    }

    /// True when any part of the word is quoted or escaped.
    pub fn has_quotes(&self) -> bool {
        self.parts.iter().any(|p| {
            matches!(
                p,
                WordPart::Escaped(_) | WordPart::SingleQuoted(_) | WordPart::DoubleQuoted(_)
            )
        })
    }

    /// True when the word contains an expansion of any kind.
    pub fn has_expansions(&self) -> bool {
        fn part_has(p: &WordPart) -> bool {
            match p {
                WordPart::Literal(_) | WordPart::Escaped(_) | WordPart::SingleQuoted(_) => false,
                WordPart::DoubleQuoted(inner) => inner.iter().any(part_has),
                _ => true,
            }
        }
        self.parts.iter().any(part_has)
    }

    /// Quote removal without expansion, as used for here-document delimiters
    /// and keyword recognition.
    pub fn unquoted_text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            unquote_part(part, &mut out);
        }
        out
    }

    /// Name of an assignment word (`NAME=...` with an unquoted name).
    pub fn assignment_name(&self) -> Option<&str> {
        let WordPart::Literal(first) = self.parts.first()? else {
            return None;
        };
        let eq = first.find('=')?;
        let name = &first[..eq];
        if crate::utils::is_name(name) {
            Some(name)
        } else {
            None
        }
    }

    /// Splits an assignment word into its name and value word.
    pub fn split_assignment(&self) -> Option<(String, Word)> {
        let name = self.assignment_name()?.to_string();
        let mut value = Word::new();
        let mut parts = self.parts.iter();
        if let Some(WordPart::Literal(first)) = parts.next() {
            let rest = &first[name.len() + 1..];
            if !rest.is_empty() {
                value.push_str(rest);
            }
        }
        for p in parts {
            value.add_part(p.clone());
        }
        Some((name, value))
    }
}

fn unquote_part(part: &WordPart, out: &mut String) {
    match part {
        WordPart::Literal(s) | WordPart::SingleQuoted(s) => out.push_str(s),
        WordPart::Escaped(c) => out.push(*c),
        WordPart::DoubleQuoted(inner) => {
            for p in inner {
                unquote_part(p, out);
            }
        }
        other => out.push_str(&DisplayPart(other, false).to_string()),
    }
}

fn write_escaped_dq(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            write!(f, "\\")?;
        }
        write!(f, "{}", c)?;
    }
    Ok(())
}

struct DisplayPart<'a>(&'a WordPart, bool);

impl fmt::Display for DisplayPart<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let in_dq = self.1;
        match self.0 {
            WordPart::Literal(s) => {
                if in_dq {
                    write_escaped_dq(f, s)
                } else {
                    write!(f, "{}", s)
                }
            }
            WordPart::Escaped(c) => write!(f, "\\{}", c),
            WordPart::SingleQuoted(s) => write!(f, "'{}'", s),
            WordPart::DoubleQuoted(inner) => {
                write!(f, "\"")?;
                for p in inner {
                    write!(f, "{}", DisplayPart(p, true))?;
                }
                write!(f, "\"")
            }
            WordPart::Tilde(user) => write!(f, "~{}", user),
            WordPart::Param(p) => write!(f, "{}", p),
            WordPart::CommandSubst(node) => write!(f, "$({})", node),
            WordPart::Arith(w) => write!(f, "$(({}))", w),
            WordPart::ProcSubst { output, body } => {
                write!(f, "{}({})", if *output { '>' } else { '<' }, body)
            }
        }
    }
}

impl fmt::Display for ParamExp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.braced {
            return write!(f, "${}", self.name);
        }
        let colon = |c: &bool| if *c { ":" } else { "" };
        match &self.op {
            ParamOp::Plain => write!(f, "${{{}}}", self.name),
            ParamOp::Length => write!(f, "${{#{}}}", self.name),
            ParamOp::Default { colon: c, word } => {
                write!(f, "${{{}{}-{}}}", self.name, colon(c), word)
            }
            ParamOp::Assign { colon: c, word } => {
                write!(f, "${{{}{}={}}}", self.name, colon(c), word)
            }
            ParamOp::Error { colon: c, word } => match word {
                Some(w) => write!(f, "${{{}{}?{}}}", self.name, colon(c), w),
                None => write!(f, "${{{}{}?}}", self.name, colon(c)),
            },
            ParamOp::Alternate { colon: c, word } => {
                write!(f, "${{{}{}+{}}}", self.name, colon(c), word)
            }
            ParamOp::TrimPrefix { longest, pattern } => write!(
                f,
                "${{{}{}{}}}",
                self.name,
                if *longest { "##" } else { "#" },
                pattern
            ),
            ParamOp::TrimSuffix { longest, pattern } => write!(
                f,
                "${{{}{}{}}}",
                self.name,
                if *longest { "%%" } else { "%" },
                pattern
            ),
            ParamOp::Substring { offset, length } => match length {
                Some(l) => write!(f, "${{{}:{}:{}}}", self.name, offset, l),
                None => write!(f, "${{{}:{}}}", self.name, offset),
            },
            ParamOp::Replace {
                mode,
                pattern,
                replacement,
            } => {
                let op = match mode {
                    ReplaceMode::First => "/",
                    ReplaceMode::All => "//",
                    ReplaceMode::Prefix => "/#",
                    ReplaceMode::Suffix => "/%",
                };
                write!(f, "${{{}{}{}/{}}}", self.name, op, pattern, replacement)
            }
        }
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for part in &self.parts {
            write!(f, "{}", DisplayPart(part, false))?;
        }
        Ok(())
    }
}
