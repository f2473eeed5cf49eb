use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{BinaryKind, Case, Clause, Command, FileMode, For, FunctionDef, HereDoc, If, Node, Pipeline, Redir};
use crate::lexer::Lexer;
use crate::tokenizer::{Op, Syntax, Token};
use crate::types::ShellError;
use crate::utils::is_name;
use crate::word::{Word, WordPart};

pub const KEYWORDS: &[&str] = &[
    "!", "{", "}", "case", "do", "done", "elif", "else", "esac", "fi", "for", "if", "in", "then",
    "until", "while",
];

/// Keywords that close a compound list.
const LIST_END: &[&str] = &["then", "else", "elif", "fi", "do", "done", "esac", "}"];

pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word) || word == "function" || word == "[["
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// A complete command: ends at the first newline.
    TopLevel,
    /// Body of a compound command: newlines separate commands.
    Compound,
}

/// Outcome of reading one complete command.
#[derive(Debug)]
pub enum Parsed {
    Command(Node),
    /// A blank or comment-only line.
    Empty,
    Eof,
}

#[derive(Debug)]
pub struct PendingHereDoc {
    pub id: usize,
    pub delimiter: String,
    pub quoted: bool,
    pub strip_tabs: bool,
}

pub struct Parser {
    pub(crate) lexer: Lexer,
    pub(crate) aliases: HashMap<String, String>,
    /// Disables the non-POSIX grammar extensions.
    pub(crate) posix: bool,
    pub(crate) peeked: Option<Token>,
    pub(crate) syntax: Vec<Syntax>,
    pub(crate) pending_heredocs: Vec<PendingHereDoc>,
    pub(crate) heredoc_bodies: HashMap<usize, Word>,
    pub(crate) token_line: usize,
    next_heredoc_id: usize,
    /// The last alias expanded ended in a blank: check the next word too.
    alias_blank: bool,
}

impl Parser {
    pub fn new(lexer: Lexer) -> Self {
        let token_line = lexer.line;
        Self {
            lexer,
            aliases: HashMap::new(),
            posix: false,
            peeked: None,
            syntax: Vec::new(),
            pending_heredocs: Vec::new(),
            heredoc_bodies: HashMap::new(),
            token_line,
            next_heredoc_id: 0,
            alias_blank: false,
        }
    }

    pub fn from_string(text: &str, name: Option<String>) -> Self {
        Parser::new(Lexer::from_string(text, name, 1))
    }

    /// A parser over `text` that shares this parser's settings, used for
    /// backquoted commands and here-document bodies.
    pub(crate) fn sub_parser(&self, text: &str, line: usize) -> Parser {
        let mut sub = Parser::new(Lexer::from_string(text, self.lexer.name.clone(), line));
        sub.aliases = self.aliases.clone();
        sub.posix = self.posix;
        sub
    }

    pub fn set_aliases(&mut self, aliases: &HashMap<String, String>) {
        if &self.aliases != aliases {
            self.aliases = aliases.clone();
        }
    }

    pub fn set_posix(&mut self, posix: bool) {
        self.posix = posix;
    }

    pub fn lexer_mut(&mut self) -> &mut Lexer {
        &mut self.lexer
    }

    pub fn line(&self) -> usize {
        self.lexer.line
    }

    pub(crate) fn peek_token(&mut self) -> Result<&Token, ShellError> {
        if self.peeked.is_none() {
            let tok = self.read_token()?;
            self.peeked = Some(tok);
        }
        Ok(self.peeked.get_or_insert(Token::Eof))
    }

    pub(crate) fn next_token(&mut self) -> Result<Token, ShellError> {
        match self.peeked.take() {
            Some(tok) => Ok(tok),
            None => self.read_token(),
        }
    }

    fn unexpected(&mut self, expecting: Option<&str>) -> ShellError {
        let tok = match self.peek_token() {
            Ok(t) => t.to_string(),
            Err(e) => return e,
        };
        match expecting {
            Some(e) => self.syntax_error(format!("{} unexpected (expecting \"{}\")", tok, e)),
            None => self.syntax_error(format!("{} unexpected", tok)),
        }
    }

    fn skip_newlines(&mut self) -> Result<(), ShellError> {
        while let Token::Newline = self.peek_token()? {
            self.next_token()?;
        }
        Ok(())
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), ShellError> {
        if self.peek_token()?.is_keyword(kw) {
            self.next_token()?;
            Ok(())
        } else {
            Err(self.unexpected(Some(kw)))
        }
    }

    fn next_word(&mut self) -> Result<Word, ShellError> {
        match self.peek_token()? {
            Token::Word(_) => match self.next_token()? {
                Token::Word(w) => Ok(w),
                _ => Err(ShellError::Internal("token changed under peek".into())),
            },
            _ => Err(self.unexpected(None)),
        }
    }

    /// Drops buffered state after a syntax error so an interactive shell can
    /// continue with the next line.
    pub fn recover(&mut self) {
        self.peeked = None;
        self.pending_heredocs.clear();
        self.heredoc_bodies.clear();
        self.syntax.clear();
        self.alias_blank = false;
        self.lexer.discard_line();
    }

    /// Reads and parses one complete command.
    pub fn parse_next(&mut self) -> Result<Parsed, ShellError> {
        self.lexer.begin_command();
        match self.peek_token()? {
            Token::Eof => {
                self.next_token()?;
                return Ok(Parsed::Eof);
            }
            Token::Newline => {
                self.next_token()?;
                return Ok(Parsed::Empty);
            }
            _ => {}
        }
        let Some(mut node) = self.parse_list(ListMode::TopLevel)? else {
            return Err(self.unexpected(None));
        };
        match self.peek_token()? {
            Token::Newline | Token::Eof => {
                self.next_token()?;
            }
            _ => return Err(self.unexpected(None)),
        }
        self.attach_heredocs(&mut node);
        tracing::trace!(command = %node, "parsed");
        Ok(Parsed::Command(node))
    }

    /// Parses everything up to end of input into one node.
    pub fn parse_program(&mut self) -> Result<Node, ShellError> {
        let mut result: Option<Node> = None;
        loop {
            match self.parse_next()? {
                Parsed::Command(node) => {
                    result = Some(match result {
                        Some(prev) => Node::seq(prev, node),
                        None => node,
                    })
                }
                Parsed::Empty => {}
                Parsed::Eof => break,
            }
        }
        Ok(result.unwrap_or_else(Node::empty))
    }

    fn attach_heredocs(&mut self, node: &mut Node) {
        if self.heredoc_bodies.is_empty() {
            return;
        }
        let bodies = &mut self.heredoc_bodies;
        node.for_each_heredoc_mut(&mut |doc: &mut HereDoc| {
            if let Some(body) = bodies.remove(&doc.id) {
                doc.body = body;
            }
        });
    }

    fn ends_list(&self, tok: &Token, mode: ListMode) -> bool {
        match tok {
            Token::Eof | Token::Op(Op::RParen) | Token::Op(Op::DSemi) => true,
            Token::Newline => mode == ListMode::TopLevel,
            Token::Word(_) => tok.literal().map_or(false, |w| LIST_END.contains(&w)),
            _ => false,
        }
    }

    pub(crate) fn parse_list(&mut self, mode: ListMode) -> Result<Option<Node>, ShellError> {
        let mut result: Option<Node> = None;
        loop {
            if mode == ListMode::Compound {
                self.skip_newlines()?;
            }
            let tok = self.peek_token()?.clone();
            if self.ends_list(&tok, mode) {
                break;
            }
            let mut node = self.parse_and_or()?;
            let mut more = true;
            match self.peek_token()? {
                Token::Op(Op::Amp) => {
                    self.next_token()?;
                    node = match node {
                        Node::Pipe(mut p) => {
                            p.background = true;
                            Node::Pipe(p)
                        }
                        other => Node::Background(Box::new(other)),
                    };
                }
                Token::Op(Op::Semi) => {
                    self.next_token()?;
                }
                Token::Newline if mode == ListMode::Compound => {
                    self.next_token()?;
                }
                _ => more = false,
            }
            result = Some(match result {
                Some(prev) => Node::seq(prev, node),
                None => node,
            });
            if !more {
                break;
            }
            if mode == ListMode::TopLevel && matches!(self.peek_token()?, Token::Newline | Token::Eof) {
                break;
            }
        }
        Ok(result)
    }

    fn required_list(&mut self, expecting: &str) -> Result<Node, ShellError> {
        match self.parse_list(ListMode::Compound)? {
            Some(node) => Ok(node),
            None => Err(self.unexpected(Some(expecting))),
        }
    }

    fn parse_and_or(&mut self) -> Result<Node, ShellError> {
        let mut left = self.parse_pipeline()?;
        loop {
            let kind = match self.peek_token()? {
                Token::Op(Op::AndIf) => BinaryKind::And,
                Token::Op(Op::OrIf) => BinaryKind::Or,
                _ => break,
            };
            self.next_token()?;
            self.skip_newlines()?;
            let right = self.parse_pipeline()?;
            left = Node::Binary(kind, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_pipeline(&mut self) -> Result<Node, ShellError> {
        let mut negate = false;
        while self.peek_token()?.is_keyword("!") {
            self.next_token()?;
            negate = !negate;
        }
        let first = self.parse_command()?;
        let mut commands = vec![first];
        while let Token::Op(Op::Pipe) = self.peek_token()? {
            self.next_token()?;
            self.skip_newlines()?;
            commands.push(self.parse_command()?);
        }
        let node = if commands.len() == 1 {
            commands.remove(0)
        } else {
            Node::Pipe(Pipeline {
                commands,
                background: false,
            })
        };
        Ok(if negate { Node::Not(Box::new(node)) } else { node })
    }

    /// Peeks the token in command position, expanding aliases.
    fn command_token(&mut self) -> Result<Token, ShellError> {
        let mut expanded: Vec<String> = Vec::new();
        self.alias_blank = false;
        loop {
            let tok = self.peek_token()?.clone();
            if let Some(text) = tok.literal() {
                if !is_keyword(text) && !expanded.iter().any(|e| e == text) {
                    if let Some(value) = self.aliases.get(text).cloned() {
                        expanded.push(text.to_string());
                        self.peeked = None;
                        self.alias_blank = value.ends_with([' ', '\t']);
                        self.lexer.push_string(&value);
                        continue;
                    }
                }
            }
            return Ok(tok);
        }
    }

    fn parse_command(&mut self) -> Result<Node, ShellError> {
        let tok = self.command_token()?;
        let line = self.token_line;
        let node = match &tok {
            Token::Op(Op::LParen) => {
                self.next_token()?;
                let body = self.required_list(")")?;
                match self.peek_token()? {
                    Token::Op(Op::RParen) => {
                        self.next_token()?;
                    }
                    _ => return Err(self.unexpected(Some(")"))),
                }
                Node::Subshell(Box::new(body))
            }
            Token::Word(_) => match tok.literal() {
                Some("if") => {
                    self.next_token()?;
                    self.parse_if_rest()?
                }
                Some(kw @ ("while" | "until")) => {
                    let kind = if kw == "while" {
                        BinaryKind::While
                    } else {
                        BinaryKind::Until
                    };
                    self.next_token()?;
                    let cond = self.required_list("do")?;
                    let body = self.parse_do_group()?;
                    Node::Binary(kind, Box::new(cond), Box::new(body))
                }
                Some("for") => self.parse_for(line)?,
                Some("case") => self.parse_case(line)?,
                Some("{") => {
                    self.next_token()?;
                    let body = self.required_list("}")?;
                    self.expect_keyword("}")?;
                    body
                }
                Some("function") if !self.posix => {
                    self.next_token()?;
                    let name = self.next_word()?;
                    let name = match name.as_literal() {
                        Some(n) if !is_keyword(n) => n.to_string(),
                        _ => return Err(self.syntax_error(format!("Bad function name \"{}\"", name))),
                    };
                    if let Token::Op(Op::LParen) = self.peek_token()? {
                        self.next_token()?;
                        match self.next_token()? {
                            Token::Op(Op::RParen) => {}
                            _ => return Err(self.unexpected(Some(")"))),
                        }
                    }
                    return self.parse_function_body(name, line);
                }
                Some("[[") if !self.posix => self.parse_double_bracket(line)?,
                Some(kw) if LIST_END.contains(&kw) || kw == "in" => {
                    return Err(self.unexpected(None));
                }
                _ => return self.parse_simple_command(line),
            },
            Token::IoNumber(_) => return self.parse_simple_command(line),
            Token::Op(op) if op.is_redirection() => return self.parse_simple_command(line),
            _ => return Err(self.unexpected(None)),
        };
        let mut redirs = Vec::new();
        loop {
            match self.peek_token()? {
                Token::IoNumber(_) => {}
                Token::Op(op) if op.is_redirection() => {}
                _ => break,
            }
            redirs.extend(self.parse_redirect()?);
        }
        if redirs.is_empty() {
            Ok(node)
        } else {
            Ok(Node::Redirect(Box::new(node), redirs))
        }
    }

    fn parse_if_rest(&mut self) -> Result<Node, ShellError> {
        let test = self.required_list("then")?;
        self.expect_keyword("then")?;
        let then = self.required_list("fi")?;
        let otherwise = match self.peek_token()?.literal() {
            Some("elif") => {
                self.next_token()?;
                Some(self.parse_if_rest()?)
            }
            Some("else") => {
                self.next_token()?;
                let body = self.required_list("fi")?;
                self.expect_keyword("fi")?;
                Some(body)
            }
            Some("fi") => {
                self.next_token()?;
                None
            }
            _ => return Err(self.unexpected(Some("fi"))),
        };
        Ok(Node::If(Box::new(If {
            test,
            then,
            otherwise,
        })))
    }

    fn parse_do_group(&mut self) -> Result<Node, ShellError> {
        self.skip_newlines()?;
        self.expect_keyword("do")?;
        let body = self.required_list("done")?;
        self.expect_keyword("done")?;
        Ok(body)
    }

    fn parse_for(&mut self, line: usize) -> Result<Node, ShellError> {
        self.next_token()?;
        let var = match self.next_token()? {
            Token::Word(w) => match w.as_literal() {
                Some(name) if is_name(name) => name.to_string(),
                _ => return Err(self.syntax_error("Bad for loop variable")),
            },
            _ => return Err(self.syntax_error("Bad for loop variable")),
        };
        self.skip_newlines()?;
        let mut words = None;
        if self.peek_token()?.is_keyword("in") {
            self.next_token()?;
            let mut list = Vec::new();
            loop {
                match self.next_token()? {
                    Token::Word(w) => list.push(w),
                    Token::Op(Op::Semi) | Token::Newline => break,
                    other => {
                        self.peeked = Some(other);
                        return Err(self.unexpected(Some("do")));
                    }
                }
            }
            words = Some(list);
        } else if let Token::Op(Op::Semi) = self.peek_token()? {
            self.next_token()?;
        }
        let body = self.parse_do_group()?;
        Ok(Node::For(Box::new(For {
            var,
            words,
            body,
            line,
        })))
    }

    fn parse_case(&mut self, line: usize) -> Result<Node, ShellError> {
        self.next_token()?;
        let subject = self.next_word()?;
        self.skip_newlines()?;
        self.expect_keyword("in")?;
        let mut clauses = Vec::new();
        loop {
            self.skip_newlines()?;
            if self.peek_token()?.is_keyword("esac") {
                self.next_token()?;
                break;
            }
            if let Token::Op(Op::LParen) = self.peek_token()? {
                self.next_token()?;
            }
            let mut patterns = vec![self.next_word()?];
            loop {
                match self.next_token()? {
                    Token::Op(Op::Pipe) => patterns.push(self.next_word()?),
                    Token::Op(Op::RParen) => break,
                    other => {
                        self.peeked = Some(other);
                        return Err(self.unexpected(Some(")")));
                    }
                }
            }
            let body = self.parse_list(ListMode::Compound)?;
            clauses.push(Clause { patterns, body });
            match self.peek_token()? {
                Token::Op(Op::DSemi) => {
                    self.next_token()?;
                }
                tok if tok.is_keyword("esac") => {}
                _ => return Err(self.unexpected(Some(";;"))),
            }
        }
        Ok(Node::Case(Box::new(Case {
            subject,
            clauses,
            line,
        })))
    }

    fn parse_function_body(&mut self, name: String, line: usize) -> Result<Node, ShellError> {
        self.skip_newlines()?;
        let body = self.parse_command()?;
        Ok(Node::FunctionDef(FunctionDef {
            name,
            body: Rc::new(body),
            line,
        }))
    }

    /// `[[ ... ]]`: operators inside become plain operand words.
    fn parse_double_bracket(&mut self, line: usize) -> Result<Node, ShellError> {
        let open = self.next_word()?;
        let mut args = vec![open];
        loop {
            match self.next_token()? {
                Token::Word(w) => {
                    let done = w.as_literal() == Some("]]");
                    args.push(w);
                    if done {
                        break;
                    }
                }
                Token::Op(op @ (Op::AndIf | Op::OrIf | Op::LParen | Op::RParen | Op::Less | Op::Great)) => {
                    args.push(Word::literal(op.as_str()))
                }
                Token::Newline => {}
                other => {
                    self.peeked = Some(other);
                    return Err(self.unexpected(Some("]]")));
                }
            }
        }
        Ok(Node::Command(Command {
            args,
            line,
            ..Default::default()
        }))
    }

    fn parse_simple_command(&mut self, line: usize) -> Result<Node, ShellError> {
        let mut cmd = Command {
            line,
            ..Default::default()
        };
        // The first word was already alias-checked by the caller.
        let mut check_alias = false;
        loop {
            let tok = if check_alias {
                self.command_token()?
            } else {
                self.peek_token()?.clone()
            };
            check_alias = false;
            match tok {
                Token::IoNumber(_) => cmd.redirs.extend(self.parse_redirect()?),
                Token::Op(op) if op.is_redirection() => cmd.redirs.extend(self.parse_redirect()?),
                Token::Word(w) => {
                    self.next_token()?;
                    if cmd.args.is_empty() && w.assignment_name().is_some() {
                        cmd.assigns.push(w);
                        check_alias = true;
                        continue;
                    }
                    let is_def = cmd.args.is_empty()
                        && cmd.assigns.is_empty()
                        && cmd.redirs.is_empty()
                        && matches!(self.peek_token()?, Token::Op(Op::LParen));
                    if is_def {
                        let name = match w.as_literal() {
                            Some(n) if !is_keyword(n) && (is_name(n) || !self.posix) => n.to_string(),
                            _ => return Err(self.syntax_error(format!("Bad function name \"{}\"", w))),
                        };
                        self.next_token()?;
                        match self.next_token()? {
                            Token::Op(Op::RParen) => {}
                            other => {
                                self.peeked = Some(other);
                                return Err(self.unexpected(Some(")")));
                            }
                        }
                        return self.parse_function_body(name, line);
                    }
                    cmd.args.push(w);
                    check_alias = self.alias_blank && self.lexer.pushed_text_blank();
                }
                _ => break,
            }
        }
        if cmd.args.is_empty() && cmd.assigns.is_empty() && cmd.redirs.is_empty() {
            return Err(self.unexpected(None));
        }
        Ok(Node::Command(cmd))
    }

    fn alloc_heredoc_id(&mut self) -> usize {
        self.next_heredoc_id += 1;
        self.next_heredoc_id
    }

    fn parse_redirect(&mut self) -> Result<Vec<Redir>, ShellError> {
        let explicit_fd = match self.peek_token()? {
            Token::IoNumber(n) => {
                let n = *n;
                self.next_token()?;
                Some(n)
            }
            _ => None,
        };
        let op = match self.next_token()? {
            Token::Op(op) if op.is_redirection() => op,
            other => {
                self.peeked = Some(other);
                return Err(self.unexpected(None));
            }
        };
        let file = |fd: i32, mode: FileMode, target: Word| Redir::File {
            fd: explicit_fd.unwrap_or(fd),
            mode,
            target,
        };
        let redir = match op {
            Op::Less => file(0, FileMode::Read, self.next_word()?),
            Op::Great => file(1, FileMode::Write, self.next_word()?),
            Op::DGreat => file(1, FileMode::Append, self.next_word()?),
            Op::Clobber => file(1, FileMode::Clobber, self.next_word()?),
            Op::LessGreat => file(0, FileMode::ReadWrite, self.next_word()?),
            Op::LessAnd | Op::GreatAnd => {
                let output = op == Op::GreatAnd;
                Redir::Dup {
                    fd: explicit_fd.unwrap_or(if output { 1 } else { 0 }),
                    output,
                    target: self.next_word()?,
                }
            }
            Op::AndGreat => {
                let target = self.next_word()?;
                return Ok(vec![
                    Redir::File {
                        fd: 1,
                        mode: FileMode::Write,
                        target,
                    },
                    Redir::Dup {
                        fd: 2,
                        output: true,
                        target: Word::literal("1"),
                    },
                ]);
            }
            Op::DLess | Op::DLessDash => {
                let delim = self.next_word()?;
                let id = self.alloc_heredoc_id();
                let quoted = delim.has_quotes();
                let delimiter = delim.unquoted_text();
                let strip_tabs = op == Op::DLessDash;
                self.pending_heredocs.push(PendingHereDoc {
                    id,
                    delimiter: delimiter.clone(),
                    quoted,
                    strip_tabs,
                });
                Redir::HereDoc {
                    fd: explicit_fd.unwrap_or(0),
                    doc: HereDoc {
                        id,
                        delimiter,
                        quoted,
                        strip_tabs,
                        body: Word::new(),
                    },
                }
            }
            Op::TLess => {
                let mut body = self.next_word()?;
                body.add_part(WordPart::SingleQuoted("\n".into()));
                Redir::HereDoc {
                    fd: explicit_fd.unwrap_or(0),
                    doc: HereDoc {
                        id: 0,
                        delimiter: String::new(),
                        quoted: false,
                        strip_tabs: false,
                        body,
                    },
                }
            }
            _ => return Err(self.unexpected(None)),
        };
        Ok(vec![redir])
    }
}
