use std::fmt;

use crate::ast::Node;
use crate::parser::{Parser, PendingHereDoc};
use crate::types::ShellError;
use crate::word::{ParamExp, ParamOp, ReplaceMode, Word, WordPart};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    /// Digits immediately followed by a redirection operator.
    IoNumber(i32),
    Op(Op),
    Newline,
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Semi,      // ;
    Amp,       // &
    Pipe,      // |
    AndIf,     // &&
    OrIf,      // ||
    DSemi,     // ;;
    LParen,    // (
    RParen,    // )
    Less,      // <
    Great,     // >
    DGreat,    // >>
    Clobber,   // >|
    LessAnd,   // <&
    GreatAnd,  // >&
    LessGreat, // <>
    DLess,     // <<
    DLessDash, // <<-
    TLess,     // <<<
    AndGreat,  // &>
}

impl Op {
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Semi => ";",
            Op::Amp => "&",
            Op::Pipe => "|",
            Op::AndIf => "&&",
            Op::OrIf => "||",
            Op::DSemi => ";;",
            Op::LParen => "(",
            Op::RParen => ")",
            Op::Less => "<",
            Op::Great => ">",
            Op::DGreat => ">>",
            Op::Clobber => ">|",
            Op::LessAnd => "<&",
            Op::GreatAnd => ">&",
            Op::LessGreat => "<>",
            Op::DLess => "<<",
            Op::DLessDash => "<<-",
            Op::TLess => "<<<",
            Op::AndGreat => "&>",
        }
    }

    pub fn is_redirection(&self) -> bool {
        matches!(
            self,
            Op::Less
                | Op::Great
                | Op::DGreat
                | Op::Clobber
                | Op::LessAnd
                | Op::GreatAnd
                | Op::LessGreat
                | Op::DLess
                | Op::DLessDash
                | Op::TLess
                | Op::AndGreat
        )
    }
}

impl Token {
    /// The literal text of an unquoted word token.
    pub fn literal(&self) -> Option<&str> {
        match self {
            Token::Word(w) => w.as_literal(),
            _ => None,
        }
    }

    pub fn is_keyword(&self, kw: &str) -> bool {
        self.literal() == Some(kw)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "\"{}\"", w),
            Token::IoNumber(n) => write!(f, "\"{}\"", n),
            Token::Op(op) => write!(f, "\"{}\"", op.as_str()),
            Token::Newline => write!(f, "newline"),
            Token::Eof => write!(f, "end of file"),
        }
    }
}

/// Character classification context. Nested contexts are pushed on the
/// parser's syntax stack while a word is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syntax {
    /// Unquoted word text.
    Base,
    /// Inside `"..."`.
    Double,
    /// Inside `$((...))`.
    Arith,
    /// Argument word of `${name op word}` outside double quotes.
    ParamWord,
    /// Argument word of `${name op word}` inside double quotes.
    ParamDouble,
    /// Body of an unquoted here-document.
    HereDoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Literal,
    EndWord,
    Backslash,
    SingleQuote,
    DoubleQuote,
    Dollar,
    Backquote,
    CloseBrace,
    OpenParen,
    CloseParen,
}

fn action(syntax: Syntax, c: char) -> Action {
    use Action::*;
    use Syntax::*;
    match (syntax, c) {
        (_, '$') => Dollar,
        (_, '`') => Backquote,
        (_, '\\') => Backslash,
        (Base, ' ' | '\t' | '\n' | ';' | '&' | '|' | '<' | '>' | '(' | ')') => EndWord,
        (Base | ParamWord, '\'') => SingleQuote,
        (Base | Double | ParamWord | ParamDouble | Arith, '"') => DoubleQuote,
        (ParamWord | ParamDouble, '}') => CloseBrace,
        (Arith, '(') => OpenParen,
        (Arith, ')') => CloseParen,
        _ => Literal,
    }
}

/// Characters a backslash escapes in the given context. Elsewhere the
/// backslash is kept.
fn escapable(syntax: Syntax, c: char) -> bool {
    match syntax {
        Syntax::Base | Syntax::ParamWord => true,
        Syntax::Double => matches!(c, '$' | '`' | '"' | '\\'),
        Syntax::ParamDouble => matches!(c, '$' | '`' | '"' | '\\' | '}'),
        Syntax::Arith | Syntax::HereDoc => matches!(c, '$' | '`' | '\\'),
    }
}

fn is_special_param(c: char) -> bool {
    matches!(c, '@' | '*' | '#' | '?' | '-' | '$' | '!' | '0'..='9')
}

fn is_name_start(c: char) -> bool {
    c == '_' || c.is_ascii_alphabetic()
}

fn is_name_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

/// Accumulates parts, merging adjacent literal text.
#[derive(Default)]
struct PartBuf {
    parts: Vec<WordPart>,
}

impl PartBuf {
    fn push_char(&mut self, c: char) {
        if let Some(WordPart::Literal(s)) = self.parts.last_mut() {
            s.push(c);
        } else {
            self.parts.push(WordPart::Literal(c.to_string()));
        }
    }

    fn push(&mut self, part: WordPart) {
        self.parts.push(part);
    }

    fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl Parser {
    fn getc(&mut self) -> Option<char> {
        self.lexer.next_char_bsnl()
    }

    fn ungetc(&mut self, c: char) {
        self.lexer.unget(c);
    }

    pub(crate) fn syntax_error(&self, message: impl Into<String>) -> ShellError {
        ShellError::syntax(self.lexer.name.clone(), self.lexer.line, message)
    }

    /// Reads the next token from the input.
    pub fn read_token(&mut self) -> Result<Token, ShellError> {
        loop {
            let Some(c) = self.getc() else {
                if !self.pending_heredocs.is_empty() {
                    self.read_heredoc_bodies()?;
                }
                if let Some(err) = self.lexer.take_error() {
                    return Err(self.syntax_error(format!("read error: {}", err)));
                }
                return Ok(Token::Eof);
            };
            self.token_line = self.lexer.line;
            match c {
                ' ' | '\t' => continue,
                '#' => {
                    while let Some(c) = self.lexer.next_char() {
                        if c == '\n' {
                            self.ungetc(c);
                            break;
                        }
                    }
                }
                '\n' => {
                    self.read_heredoc_bodies()?;
                    return Ok(Token::Newline);
                }
                ';' => return Ok(Token::Op(self.follow(&[(';', Op::DSemi)], Op::Semi))),
                '|' => return Ok(Token::Op(self.follow(&[('|', Op::OrIf)], Op::Pipe))),
                '&' => {
                    if !self.posix && self.lexer.peek_char_bsnl() == Some('>') {
                        self.getc();
                        return Ok(Token::Op(Op::AndGreat));
                    }
                    return Ok(Token::Op(self.follow(&[('&', Op::AndIf)], Op::Amp)));
                }
                '(' => return Ok(Token::Op(Op::LParen)),
                ')' => return Ok(Token::Op(Op::RParen)),
                '<' | '>' if !self.posix && self.lexer.peek_char_bsnl() == Some('(') => {
                    self.getc();
                    let body = self.read_subst_body()?;
                    let mut buf = PartBuf::default();
                    buf.push(WordPart::ProcSubst {
                        output: c == '>',
                        body: Box::new(body),
                    });
                    self.read_parts_into(&mut buf, Syntax::Base, &[])?;
                    return Ok(Token::Word(Word { parts: buf.parts }));
                }
                '<' => {
                    let op = match self.getc() {
                        Some('<') => match self.getc() {
                            Some('-') => Op::DLessDash,
                            Some('<') if !self.posix => Op::TLess,
                            Some(other) => {
                                self.ungetc(other);
                                Op::DLess
                            }
                            None => Op::DLess,
                        },
                        Some('&') => Op::LessAnd,
                        Some('>') => Op::LessGreat,
                        Some(other) => {
                            self.ungetc(other);
                            Op::Less
                        }
                        None => Op::Less,
                    };
                    return Ok(Token::Op(op));
                }
                '>' => {
                    let op = self.follow(
                        &[('>', Op::DGreat), ('&', Op::GreatAnd), ('|', Op::Clobber)],
                        Op::Great,
                    );
                    return Ok(Token::Op(op));
                }
                _ => {
                    self.ungetc(c);
                    return self.read_word_token();
                }
            }
        }
    }

    fn follow(&mut self, table: &[(char, Op)], default: Op) -> Op {
        match self.getc() {
            Some(c) => match table.iter().find(|(ch, _)| *ch == c) {
                Some((_, op)) => *op,
                None => {
                    self.ungetc(c);
                    default
                }
            },
            None => default,
        }
    }

    fn read_word_token(&mut self) -> Result<Token, ShellError> {
        let mut buf = PartBuf::default();
        self.read_parts_into(&mut buf, Syntax::Base, &[])?;
        if let [WordPart::Literal(s)] = buf.parts.as_slice() {
            if s.len() <= 9 && s.chars().all(|c| c.is_ascii_digit()) {
                if let Some('<' | '>') = self.lexer.peek_char_bsnl() {
                    if let Ok(n) = s.parse::<i32>() {
                        return Ok(Token::IoNumber(n));
                    }
                }
            }
        }
        Ok(Token::Word(Word { parts: buf.parts }))
    }

    /// Reads a complete word in `syntax`, stopping at the context's end or
    /// at an unquoted character in `stop`.
    pub(crate) fn read_word(&mut self, syntax: Syntax, stop: &[char]) -> Result<Word, ShellError> {
        let mut buf = PartBuf::default();
        self.read_parts_into(&mut buf, syntax, stop)?;
        Ok(Word { parts: buf.parts })
    }

    fn read_parts_into(
        &mut self,
        buf: &mut PartBuf,
        syntax: Syntax,
        stop: &[char],
    ) -> Result<(), ShellError> {
        self.syntax.push(syntax);
        let result = self.read_parts_inner(buf, syntax, stop);
        self.syntax.pop();
        result
    }

    fn read_parts_inner(
        &mut self,
        buf: &mut PartBuf,
        syntax: Syntax,
        stop: &[char],
    ) -> Result<(), ShellError> {
        let mut depth = 0usize;
        let mut at_start = buf.is_empty();
        loop {
            let Some(c) = self.getc() else {
                return match syntax {
                    Syntax::Base | Syntax::HereDoc => Ok(()),
                    Syntax::Double => Err(self.syntax_error("Unterminated quoted string")),
                    Syntax::Arith => Err(self.syntax_error("Missing '))'")),
                    Syntax::ParamWord | Syntax::ParamDouble => Err(self.syntax_error("Missing '}'")),
                };
            };
            if at_start && c == '~' && matches!(syntax, Syntax::Base | Syntax::ParamWord) {
                at_start = false;
                self.read_tilde(buf, syntax, stop);
                continue;
            }
            at_start = false;
            match action(syntax, c) {
                Action::EndWord => {
                    self.ungetc(c);
                    return Ok(());
                }
                Action::CloseBrace => {
                    self.ungetc(c);
                    return Ok(());
                }
                Action::Literal if stop.contains(&c) => {
                    self.ungetc(c);
                    return Ok(());
                }
                Action::Literal => buf.push_char(c),
                Action::Backslash => match self.lexer.next_char() {
                    Some(n) if escapable(syntax, n) => match syntax {
                        Syntax::Base | Syntax::ParamWord => buf.push(WordPart::Escaped(n)),
                        _ => buf.push_char(n),
                    },
                    Some(n) => {
                        buf.push_char('\\');
                        buf.push_char(n);
                    }
                    None => buf.push_char('\\'),
                },
                Action::SingleQuote => {
                    let text = self.read_single_quoted()?;
                    buf.push(WordPart::SingleQuoted(text));
                }
                Action::DoubleQuote => {
                    if syntax == Syntax::Double {
                        return Ok(());
                    }
                    let inner = self.read_word(Syntax::Double, &[])?;
                    buf.push(WordPart::DoubleQuoted(inner.parts));
                }
                Action::Dollar => match self.read_dollar(syntax)? {
                    Some(part) => buf.push(part),
                    None => buf.push_char('$'),
                },
                Action::Backquote => {
                    let in_dq = matches!(syntax, Syntax::Double | Syntax::ParamDouble);
                    let node = self.read_backquote(in_dq)?;
                    buf.push(WordPart::CommandSubst(Box::new(node)));
                }
                Action::OpenParen => {
                    depth += 1;
                    buf.push_char(c);
                }
                Action::CloseParen => {
                    if depth > 0 {
                        depth -= 1;
                        buf.push_char(c);
                        continue;
                    }
                    match self.getc() {
                        Some(')') => return Ok(()),
                        _ => return Err(self.syntax_error("Missing '))'")),
                    }
                }
            }
        }
    }

    fn read_single_quoted(&mut self) -> Result<String, ShellError> {
        let mut text = String::new();
        loop {
            match self.lexer.next_char() {
                Some('\'') => return Ok(text),
                Some(c) => text.push(c),
                None => return Err(self.syntax_error("Unterminated quoted string")),
            }
        }
    }

    /// `~` or `~user` at the start of a word. Falls back to literal text
    /// when the prefix is followed by anything but `/` or the word's end.
    fn read_tilde(&mut self, buf: &mut PartBuf, syntax: Syntax, stop: &[char]) {
        let mut user = String::new();
        loop {
            match self.getc() {
                Some(c) if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+') => {
                    user.push(c)
                }
                Some(c) => {
                    self.ungetc(c);
                    let ends = c == '/'
                        || c == ':'
                        || stop.contains(&c)
                        || matches!(action(syntax, c), Action::EndWord | Action::CloseBrace);
                    if ends {
                        buf.push(WordPart::Tilde(user));
                    } else {
                        buf.push_char('~');
                        user.chars().for_each(|c| buf.push_char(c));
                    }
                    return;
                }
                None => {
                    buf.push(WordPart::Tilde(user));
                    return;
                }
            }
        }
    }

    /// Handles the text after a `$`. Returns `None` when the `$` is literal.
    fn read_dollar(&mut self, syntax: Syntax) -> Result<Option<WordPart>, ShellError> {
        let Some(c) = self.getc() else {
            return Ok(None);
        };
        match c {
            '(' => {
                match self.getc() {
                    Some('(') => {
                        let expr = self.read_word(Syntax::Arith, &[])?;
                        return Ok(Some(WordPart::Arith(expr)));
                    }
                    Some(other) => self.ungetc(other),
                    None => {}
                }
                let body = self.read_subst_body()?;
                Ok(Some(WordPart::CommandSubst(Box::new(body))))
            }
            '{' => {
                let in_dq = matches!(
                    syntax,
                    Syntax::Double | Syntax::ParamDouble | Syntax::HereDoc
                );
                let exp = self.read_braced_param(in_dq)?;
                Ok(Some(WordPart::Param(Box::new(exp))))
            }
            '\'' if !self.posix && matches!(syntax, Syntax::Base | Syntax::ParamWord) => {
                let text = self.read_ansi_c()?;
                Ok(Some(WordPart::SingleQuoted(text)))
            }
            c if is_name_start(c) => {
                let mut name = c.to_string();
                while let Some(n) = self.getc() {
                    if is_name_char(n) {
                        name.push(n);
                    } else {
                        self.ungetc(n);
                        break;
                    }
                }
                Ok(Some(plain_param(name)))
            }
            c if is_special_param(c) => Ok(Some(plain_param(c.to_string()))),
            other => {
                self.ungetc(other);
                Ok(None)
            }
        }
    }

    fn read_braced_param(&mut self, in_dq: bool) -> Result<ParamExp, ShellError> {
        let bad = |p: &Parser| p.syntax_error("Bad substitution");
        let mut length = false;
        let first = self.getc().ok_or_else(|| self.syntax_error("Missing '}'"))?;
        let mut name = String::new();
        if first == '#' {
            match self.getc() {
                Some('}') => {
                    return Ok(ParamExp {
                        name: "#".into(),
                        op: ParamOp::Plain,
                        braced: true,
                    })
                }
                Some(c) if is_name_start(c) || is_special_param(c) => {
                    // `${#-}` / `${#?}` with no operand text name `#` itself
                    // followed by an operator; anything else is a length.
                    let next = self.getc();
                    if matches!(c, '-' | '=' | '?' | '+' | ':') && next != Some('}') {
                        if let Some(n) = next {
                            self.ungetc(n);
                        }
                        self.ungetc(c);
                        name.push('#');
                    } else {
                        length = true;
                        if let Some(n) = next {
                            self.ungetc(n);
                        }
                        self.ungetc(c);
                    }
                }
                Some(c) => {
                    self.ungetc(c);
                    name.push('#');
                }
                None => return Err(self.syntax_error("Missing '}'")),
            }
        } else {
            self.ungetc(first);
        }

        if name.is_empty() {
            let c = self.getc().ok_or_else(|| self.syntax_error("Missing '}'"))?;
            if is_name_start(c) {
                name.push(c);
                while let Some(n) = self.getc() {
                    if is_name_char(n) {
                        name.push(n);
                    } else {
                        self.ungetc(n);
                        break;
                    }
                }
            } else if c.is_ascii_digit() {
                name.push(c);
                while let Some(n) = self.getc() {
                    if n.is_ascii_digit() {
                        name.push(n);
                    } else {
                        self.ungetc(n);
                        break;
                    }
                }
            } else if is_special_param(c) {
                name.push(c);
            } else {
                return Err(bad(self));
            }
        }

        let word_syntax = if in_dq {
            Syntax::ParamDouble
        } else {
            Syntax::ParamWord
        };
        let c = self.getc().ok_or_else(|| self.syntax_error("Missing '}'"))?;
        if length {
            if c != '}' {
                return Err(bad(self));
            }
            return Ok(ParamExp {
                name,
                op: ParamOp::Length,
                braced: true,
            });
        }
        let op = match c {
            '}' => {
                return Ok(ParamExp {
                    name,
                    op: ParamOp::Plain,
                    braced: true,
                })
            }
            ':' => match self.getc() {
                Some(c @ ('-' | '=' | '?' | '+')) => self.read_param_op(c, true, word_syntax)?,
                Some(other) => {
                    if self.posix {
                        return Err(bad(self));
                    }
                    self.ungetc(other);
                    let offset = self.read_word(word_syntax, &[':'])?;
                    let length = if self.lexer.peek_char_bsnl() == Some(':') {
                        self.getc();
                        Some(self.read_word(word_syntax, &[])?)
                    } else {
                        None
                    };
                    ParamOp::Substring { offset, length }
                }
                None => return Err(self.syntax_error("Missing '}'")),
            },
            '-' | '=' | '?' | '+' => self.read_param_op(c, false, word_syntax)?,
            '#' | '%' => {
                let longest = if self.lexer.peek_char_bsnl() == Some(c) {
                    self.getc();
                    true
                } else {
                    false
                };
                let pattern = self.read_word(word_syntax, &[])?;
                if c == '#' {
                    ParamOp::TrimPrefix { longest, pattern }
                } else {
                    ParamOp::TrimSuffix { longest, pattern }
                }
            }
            '/' if !self.posix => {
                let mode = match self.getc() {
                    Some('/') => ReplaceMode::All,
                    Some('#') => ReplaceMode::Prefix,
                    Some('%') => ReplaceMode::Suffix,
                    Some(other) => {
                        self.ungetc(other);
                        ReplaceMode::First
                    }
                    None => return Err(self.syntax_error("Missing '}'")),
                };
                let pattern = self.read_word(word_syntax, &['/'])?;
                let replacement = if self.lexer.peek_char_bsnl() == Some('/') {
                    self.getc();
                    self.read_word(word_syntax, &[])?
                } else {
                    Word::new()
                };
                ParamOp::Replace {
                    mode,
                    pattern,
                    replacement,
                }
            }
            _ => return Err(bad(self)),
        };
        match self.getc() {
            Some('}') => Ok(ParamExp {
                name,
                op,
                braced: true,
            }),
            _ => Err(bad(self)),
        }
    }

    fn read_param_op(&mut self, c: char, colon: bool, syntax: Syntax) -> Result<ParamOp, ShellError> {
        let word = self.read_word(syntax, &[])?;
        Ok(match c {
            '-' => ParamOp::Default { colon, word },
            '=' => ParamOp::Assign { colon, word },
            '+' => ParamOp::Alternate { colon, word },
            _ => ParamOp::Error {
                colon,
                word: if word.is_empty() { None } else { Some(word) },
            },
        })
    }

    /// `$'...'` with C-style escapes.
    fn read_ansi_c(&mut self) -> Result<String, ShellError> {
        let mut out = String::new();
        loop {
            let c = self
                .lexer
                .next_char()
                .ok_or_else(|| self.syntax_error("Unterminated quoted string"))?;
            match c {
                '\'' => return Ok(out),
                '\\' => {
                    let e = self
                        .lexer
                        .next_char()
                        .ok_or_else(|| self.syntax_error("Unterminated quoted string"))?;
                    match e {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'a' => out.push('\x07'),
                        'b' => out.push('\x08'),
                        'e' | 'E' => out.push('\x1b'),
                        'f' => out.push('\x0c'),
                        'v' => out.push('\x0b'),
                        '\\' | '\'' | '"' | '?' => out.push(e),
                        'c' => {
                            if let Some(x) = self.lexer.next_char() {
                                out.push(((x.to_ascii_uppercase() as u8) ^ 0x40) as char);
                            }
                        }
                        '0'..='7' => {
                            let mut value = e.to_digit(8).unwrap_or(0);
                            for _ in 0..2 {
                                match self.lexer.peek_char() {
                                    Some(d @ '0'..='7') => {
                                        self.lexer.next_char();
                                        value = value * 8 + d.to_digit(8).unwrap_or(0);
                                    }
                                    _ => break,
                                }
                            }
                            out.push(char::from_u32(value & 0xff).unwrap_or('\0'));
                        }
                        'x' | 'u' | 'U' => {
                            let max = match e {
                                'x' => 2,
                                'u' => 4,
                                _ => 8,
                            };
                            let mut value = 0u32;
                            let mut digits = 0;
                            while digits < max {
                                match self.lexer.peek_char() {
                                    Some(d) if d.is_ascii_hexdigit() => {
                                        self.lexer.next_char();
                                        value = value * 16 + d.to_digit(16).unwrap_or(0);
                                        digits += 1;
                                    }
                                    _ => break,
                                }
                            }
                            if digits == 0 {
                                out.push('\\');
                                out.push(e);
                            } else if let Some(ch) = char::from_u32(value) {
                                out.push(ch);
                            }
                        }
                        other => {
                            out.push('\\');
                            out.push(other);
                        }
                    }
                }
                c => out.push(c),
            }
        }
    }

    /// Parses the list inside `$(...)`, `<(...)` or `>(...)` up to and
    /// including the closing parenthesis.
    fn read_subst_body(&mut self) -> Result<Node, ShellError> {
        let saved = self.peeked.take();
        let body = self.parse_list(crate::parser::ListMode::Compound)?;
        match self.next_token()? {
            Token::Op(Op::RParen) => {}
            other => {
                return Err(self.syntax_error(format!("{} unexpected (expecting \")\")", other)))
            }
        }
        self.peeked = saved;
        Ok(body.unwrap_or_else(Node::empty))
    }

    fn read_backquote(&mut self, in_dq: bool) -> Result<Node, ShellError> {
        let line = self.lexer.line;
        let mut text = String::new();
        loop {
            match self.lexer.next_char_bsnl() {
                None => return Err(self.syntax_error("EOF in backquote substitution")),
                Some('`') => break,
                Some('\\') => match self.lexer.next_char() {
                    Some(c @ ('$' | '`' | '\\')) => text.push(c),
                    Some('"') if in_dq => text.push('"'),
                    Some(c) => {
                        text.push('\\');
                        text.push(c);
                    }
                    None => text.push('\\'),
                },
                Some(c) => text.push(c),
            }
        }
        let mut sub = self.sub_parser(&text, line);
        sub.parse_program()
    }

    /// Reads the bodies of here-documents whose operators appeared on the
    /// line just ended.
    pub(crate) fn read_heredoc_bodies(&mut self) -> Result<(), ShellError> {
        let pending: Vec<PendingHereDoc> = self.pending_heredocs.drain(..).collect();
        for doc in pending {
            let start_line = self.lexer.line;
            let mut text = String::new();
            while let Some(raw) = self.lexer.read_raw_line() {
                let line = if doc.strip_tabs {
                    raw.trim_start_matches('\t')
                } else {
                    raw.as_str()
                };
                if line == doc.delimiter {
                    break;
                }
                text.push_str(line);
                text.push('\n');
            }
            let body = if doc.quoted {
                let mut w = Word::new();
                if !text.is_empty() {
                    w.add_part(WordPart::SingleQuoted(text));
                }
                w
            } else {
                let mut sub = self.sub_parser(&text, start_line);
                sub.read_word(Syntax::HereDoc, &[])?
            };
            self.heredoc_bodies.insert(doc.id, body);
        }
        Ok(())
    }
}

fn plain_param(name: String) -> WordPart {
    WordPart::Param(Box::new(ParamExp {
        name,
        op: ParamOp::Plain,
        braced: false,
    }))
}
