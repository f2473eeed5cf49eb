use std::fmt;
use std::rc::Rc;

use crate::word::Word;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Command(Command),
    Pipe(Pipeline),
    Redirect(Box<Node>, Vec<Redir>),
    Background(Box<Node>),
    Subshell(Box<Node>),
    Binary(BinaryKind, Box<Node>, Box<Node>),
    If(Box<If>),
    For(Box<For>),
    Case(Box<Case>),
    FunctionDef(FunctionDef),
    Not(Box<Node>),
}

/// A simple command: assignments, argument words and redirections in the
/// order they were collected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Command {
    pub assigns: Vec<Word>,
    pub args: Vec<Word>,
    pub redirs: Vec<Redir>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<Node>,
    pub background: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    And,
    Or,
    Semicolon,
    While,
    Until,
}

#[derive(Debug, Clone, PartialEq)]
pub struct If {
    pub test: Node,
    pub then: Node,
    pub otherwise: Option<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct For {
    pub var: String,
    /// `None` when `in` was omitted: iterate over the positional parameters.
    pub words: Option<Vec<Word>>,
    pub body: Node,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    pub subject: Word,
    pub clauses: Vec<Clause>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub patterns: Vec<Word>,
    pub body: Option<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    pub name: String,
    pub body: Rc<Node>,
    pub line: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,      // <
    Write,     // >
    Clobber,   // >|
    Append,    // >>
    ReadWrite, // <>
}

#[derive(Debug, Clone, PartialEq)]
pub enum Redir {
    File {
        fd: i32,
        mode: FileMode,
        target: Word,
    },
    /// `n>&word` / `n<&word`; the target is a descriptor number or `-`
    /// once expanded.
    Dup {
        fd: i32,
        output: bool,
        target: Word,
    },
    HereDoc {
        fd: i32,
        doc: HereDoc,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct HereDoc {
    /// Parser-assigned slot used to attach the body once it has been read.
    pub id: usize,
    pub delimiter: String,
    /// The delimiter was quoted: the body is taken literally.
    pub quoted: bool,
    pub strip_tabs: bool,
    pub body: Word,
}

impl Redir {
    pub fn fd(&self) -> i32 {
        match self {
            Redir::File { fd, .. } | Redir::Dup { fd, .. } | Redir::HereDoc { fd, .. } => *fd,
        }
    }
}

impl Node {
    pub fn and(left: Node, right: Node) -> Node {
        Node::Binary(BinaryKind::And, Box::new(left), Box::new(right))
    }

    pub fn or(left: Node, right: Node) -> Node {
        Node::Binary(BinaryKind::Or, Box::new(left), Box::new(right))
    }

    pub fn seq(left: Node, right: Node) -> Node {
        Node::Binary(BinaryKind::Semicolon, Box::new(left), Box::new(right))
    }

    /// An empty command, as produced by a blank line.
    pub fn empty() -> Node {
        Node::Command(Command::default())
    }

    /// Visits every here-document in the tree, including those nested in
    /// command substitutions.
    pub fn for_each_heredoc_mut(&mut self, f: &mut dyn FnMut(&mut HereDoc)) {
        fn redirs(rs: &mut [Redir], f: &mut dyn FnMut(&mut HereDoc)) {
            for r in rs {
                match r {
                    Redir::HereDoc { doc, .. } => f(doc),
                    Redir::File { target, .. } | Redir::Dup { target, .. } => word(target, f),
                }
            }
        }
        fn word(w: &mut Word, f: &mut dyn FnMut(&mut HereDoc)) {
            use crate::word::{ParamOp, WordPart};
            fn part(p: &mut WordPart, f: &mut dyn FnMut(&mut HereDoc)) {
                match p {
                    WordPart::DoubleQuoted(inner) => inner.iter_mut().for_each(|p| part(p, f)),
                    WordPart::CommandSubst(n) | WordPart::ProcSubst { body: n, .. } => {
                        n.for_each_heredoc_mut(f)
                    }
                    WordPart::Arith(w) => word(w, f),
                    WordPart::Param(pe) => match &mut pe.op {
                        ParamOp::Default { word: w, .. }
                        | ParamOp::Assign { word: w, .. }
                        | ParamOp::Alternate { word: w, .. }
                        | ParamOp::TrimPrefix { pattern: w, .. }
                        | ParamOp::TrimSuffix { pattern: w, .. } => word(w, f),
                        ParamOp::Error { word: Some(w), .. } => word(w, f),
                        ParamOp::Substring { offset, length } => {
                            word(offset, f);
                            if let Some(l) = length {
                                word(l, f);
                            }
                        }
                        ParamOp::Replace {
                            pattern,
                            replacement,
                            ..
                        } => {
                            word(pattern, f);
                            word(replacement, f);
                        }
                        _ => {}
                    },
                    _ => {}
                }
            }
            w.parts.iter_mut().for_each(|p| part(p, f));
        }

        match self {
            Node::Command(c) => {
                c.assigns.iter_mut().for_each(|w| word(w, f));
                c.args.iter_mut().for_each(|w| word(w, f));
                redirs(&mut c.redirs, f);
            }
            Node::Pipe(p) => p.commands.iter_mut().for_each(|n| n.for_each_heredoc_mut(f)),
            Node::Redirect(inner, rs) => {
                inner.for_each_heredoc_mut(f);
                redirs(rs, f);
            }
            Node::Background(n) | Node::Subshell(n) | Node::Not(n) => n.for_each_heredoc_mut(f),
            Node::Binary(_, l, r) => {
                l.for_each_heredoc_mut(f);
                r.for_each_heredoc_mut(f);
            }
            Node::If(i) => {
                i.test.for_each_heredoc_mut(f);
                i.then.for_each_heredoc_mut(f);
                if let Some(e) = &mut i.otherwise {
                    e.for_each_heredoc_mut(f);
                }
            }
            Node::For(fr) => {
                if let Some(ws) = &mut fr.words {
                    ws.iter_mut().for_each(|w| word(w, f));
                }
                fr.body.for_each_heredoc_mut(f);
            }
            Node::Case(c) => {
                word(&mut c.subject, f);
                for cl in &mut c.clauses {
                    cl.patterns.iter_mut().for_each(|w| word(w, f));
                    if let Some(b) = &mut cl.body {
                        b.for_each_heredoc_mut(f);
                    }
                }
            }
            Node::FunctionDef(def) => {
                // Bodies are fresh from the parser here, so the Rc is unique.
                if let Some(body) = Rc::get_mut(&mut def.body) {
                    body.for_each_heredoc_mut(f);
                }
            }
        }
    }
}

impl fmt::Display for Redir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redir::File { fd, mode, target } => {
                let (default_fd, op) = match mode {
                    FileMode::Read => (0, "<"),
                    FileMode::Write => (1, ">"),
                    FileMode::Clobber => (1, ">|"),
                    FileMode::Append => (1, ">>"),
                    FileMode::ReadWrite => (0, "<>"),
                };
                if *fd != default_fd {
                    write!(f, "{}", fd)?;
                }
                write!(f, "{}{}", op, target)
            }
            Redir::Dup { fd, output, target } => {
                let default_fd = if *output { 1 } else { 0 };
                if *fd != default_fd {
                    write!(f, "{}", fd)?;
                }
                write!(f, "{}&{}", if *output { ">" } else { "<" }, target)
            }
            Redir::HereDoc { fd, doc } => {
                if *fd != 0 {
                    write!(f, "{}", fd)?;
                }
                let op = if doc.strip_tabs { "<<-" } else { "<<" };
                if doc.quoted {
                    write!(f, "{}'{}'", op, doc.delimiter)
                } else {
                    write!(f, "{}{}", op, doc.delimiter)
                }
            }
        }
    }
}

fn write_redirs(f: &mut fmt::Formatter<'_>, redirs: &[Redir]) -> fmt::Result {
    for r in redirs {
        write!(f, " {}", r)?;
    }
    Ok(())
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Command(c) => {
                let mut first = true;
                for w in c.assigns.iter().chain(c.args.iter()) {
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "{}", w)?;
                }
                for r in &c.redirs {
                    if !first {
                        write!(f, " ")?;
                    }
                    first = false;
                    write!(f, "{}", r)?;
                }
                Ok(())
            }
            Node::Pipe(p) => {
                for (i, n) in p.commands.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", n)?;
                }
                if p.background {
                    write!(f, " &")?;
                }
                Ok(())
            }
            Node::Redirect(inner, redirs) => {
                write!(f, "{}", inner)?;
                write_redirs(f, redirs)
            }
            Node::Background(n) => write!(f, "{} &", n),
            Node::Subshell(n) => write!(f, "({})", n),
            Node::Binary(kind, l, r) => match kind {
                BinaryKind::And => write!(f, "{} && {}", l, r),
                BinaryKind::Or => write!(f, "{} || {}", l, r),
                BinaryKind::Semicolon => {
                    if matches!(**l, Node::Background(_))
                        || matches!(**l, Node::Pipe(Pipeline { background: true, .. }))
                    {
                        write!(f, "{} {}", l, r)
                    } else {
                        write!(f, "{}; {}", l, r)
                    }
                }
                BinaryKind::While => write!(f, "while {}; do {}; done", l, r),
                BinaryKind::Until => write!(f, "until {}; do {}; done", l, r),
            },
            Node::If(i) => {
                write!(f, "if {}; then {}", i.test, i.then)?;
                if let Some(e) = &i.otherwise {
                    write!(f, "; else {}", e)?;
                }
                write!(f, "; fi")
            }
            Node::For(fr) => {
                write!(f, "for {}", fr.var)?;
                if let Some(words) = &fr.words {
                    write!(f, " in")?;
                    for w in words {
                        write!(f, " {}", w)?;
                    }
                }
                write!(f, "; do {}; done", fr.body)
            }
            Node::Case(c) => {
                write!(f, "case {} in", c.subject)?;
                for cl in &c.clauses {
                    write!(f, " ")?;
                    for (i, p) in cl.patterns.iter().enumerate() {
                        if i > 0 {
                            write!(f, "|")?;
                        }
                        write!(f, "{}", p)?;
                    }
                    write!(f, ")")?;
                    if let Some(b) = &cl.body {
                        write!(f, " {}", b)?;
                    }
                    write!(f, ";;")?;
                }
                write!(f, " esac")
            }
            Node::FunctionDef(def) => write!(f, "{}() {{ {}; }}", def.name, def.body),
            Node::Not(n) => write!(f, "! {}", n),
        }
    }
}
