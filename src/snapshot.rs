//! Fork-state blocks.
//!
//! When a child cannot be created with `fork()`, the parent packs the state
//! the child can observe into one self-describing block and a fresh copy of
//! the shell rebuilds itself from it. Every reference inside the block is an
//! index: strings into the string table, AST nodes into the node arena.
//! Nodes are stored children first, so a record may only name nodes with a
//! lower index, and each node is claimed exactly once while decoding.
//!
//! Layout:
//!
//! ```text
//! magic "ASHF" | version u16 | kind u8 | 0u8 | body length u32 | FNV-1a u64
//! body: string table | node arena | state | continuation | child setup
//! ```

use std::collections::HashMap;
use std::rc::Rc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::ast::{BinaryKind, Case, Clause, Command, FileMode, For, FunctionDef, HereDoc, If, Node, Pipeline, Redir};
use crate::spawn::{ChildSetup, Continuation, SpawnKind};
use crate::vars::{Dynamic, Origin, Var};
use crate::word::{ParamExp, ParamOp, ReplaceMode, Word, WordPart};

const MAGIC: &[u8; 4] = b"ASHF";
const VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 4 + 8;
const NONE: u32 = u32::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad magic number")]
    BadMagic,
    #[error("unsupported block version {0}")]
    Version(u16),
    #[error("checksum mismatch")]
    Checksum,
    #[error("truncated block")]
    Truncated,
    #[error("string index {0} out of range")]
    StringIndex(u32),
    #[error("node index {0} out of range")]
    NodeIndex(u32),
    #[error("node {0} referenced twice")]
    SharedNode(u32),
    #[error("{0} unreferenced node(s)")]
    UnusedNodes(usize),
    #[error("bad {what} tag {tag}")]
    Tag { what: &'static str, tag: u8 },
    #[error("invalid utf-8 in string table")]
    Utf8,
    #[error("{0} trailing bytes")]
    Trailing(usize),
}

/// Interpreter state carried to a child.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct State {
    pub vars: Vec<(String, Var)>,
    pub aliases: Vec<(String, String)>,
    pub functions: Vec<(String, Rc<Node>)>,
    pub cmd_cache: Vec<(String, String)>,
    pub history: Vec<String>,
    pub positional: Vec<String>,
    pub arg0: String,
    pub name: String,
    pub options: u32,
    pub last_status: i32,
    pub last_bg_pid: Option<i32>,
    pub shell_pid: i32,
    pub lineno: u32,
    pub func_depth: u32,
    pub loop_depth: u32,
    pub funcnames: Vec<String>,
    pub traps: Vec<(usize, String)>,
    pub seconds_base: i64,
    pub fork_emulation: bool,
}

/// A continuation that owns its payload, as rebuilt from a block.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnedContinuation {
    Subshell(Node),
    PipelineStage(Node),
    CommandSubst(Node),
    HereDocWriter(String),
    ExecExternal {
        path: String,
        argv: Vec<String>,
        env: Vec<(String, String)>,
    },
}

impl OwnedContinuation {
    pub fn as_continuation(&self) -> Continuation<'_> {
        match self {
            OwnedContinuation::Subshell(n) => Continuation::Subshell(n),
            OwnedContinuation::PipelineStage(n) => Continuation::PipelineStage(n),
            OwnedContinuation::CommandSubst(n) => Continuation::CommandSubst(n),
            OwnedContinuation::HereDocWriter(t) => Continuation::HereDocWriter(t),
            OwnedContinuation::ExecExternal { path, argv, env } => Continuation::ExecExternal { path, argv, env },
        }
    }
}

#[derive(Debug)]
pub struct Snapshot {
    pub state: State,
    pub continuation: OwnedContinuation,
    pub setup: ChildSetup,
}

fn fnv1a(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in data {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

fn kind_tag(kind: SpawnKind) -> u8 {
    match kind {
        SpawnKind::Subshell => 0,
        SpawnKind::PipelineStage => 1,
        SpawnKind::CommandSubst => 2,
        SpawnKind::HereDocWriter => 3,
        SpawnKind::ExecExternal => 4,
    }
}

// ---------------------------------------------------------------- encoding

#[derive(Default)]
struct Encoder {
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    nodes: BytesMut,
    node_count: u32,
}

impl Encoder {
    fn string(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.string_index.get(s) {
            return i;
        }
        let i = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), i);
        i
    }

    fn put_str(&mut self, buf: &mut BytesMut, s: &str) {
        let i = self.string(s);
        buf.put_u32(i);
    }

    fn put_opt_str(&mut self, buf: &mut BytesMut, s: Option<&str>) {
        match s {
            Some(s) => self.put_str(buf, s),
            None => buf.put_u32(NONE),
        }
    }

    fn put_strs(&mut self, buf: &mut BytesMut, items: &[String]) {
        buf.put_u32(items.len() as u32);
        for s in items {
            self.put_str(buf, s);
        }
    }

    fn put_pairs(&mut self, buf: &mut BytesMut, items: &[(String, String)]) {
        buf.put_u32(items.len() as u32);
        for (a, b) in items {
            self.put_str(buf, a);
            self.put_str(buf, b);
        }
    }

    /// Appends `node` (after its children) to the arena and returns its index.
    fn node(&mut self, node: &Node) -> u32 {
        let mut rec = BytesMut::new();
        self.node_record(&mut rec, node);
        self.nodes.put(rec);
        let index = self.node_count;
        self.node_count += 1;
        index
    }

    fn opt_node(&mut self, node: Option<&Node>) -> u32 {
        node.map_or(NONE, |n| self.node(n))
    }

    fn node_record(&mut self, rec: &mut BytesMut, node: &Node) {
        match node {
            Node::Command(cmd) => {
                rec.put_u8(0);
                rec.put_u32(cmd.line as u32);
                self.words(rec, &cmd.assigns);
                self.words(rec, &cmd.args);
                self.redirs(rec, &cmd.redirs);
            }
            Node::Pipe(p) => {
                let children: Vec<u32> = p.commands.iter().map(|c| self.node(c)).collect();
                rec.put_u8(1);
                rec.put_u8(p.background as u8);
                rec.put_u32(children.len() as u32);
                for c in children {
                    rec.put_u32(c);
                }
            }
            Node::Redirect(inner, redirs) => {
                let inner = self.node(inner);
                rec.put_u8(2);
                rec.put_u32(inner);
                self.redirs(rec, redirs);
            }
            Node::Background(inner) => {
                let inner = self.node(inner);
                rec.put_u8(3);
                rec.put_u32(inner);
            }
            Node::Subshell(inner) => {
                let inner = self.node(inner);
                rec.put_u8(4);
                rec.put_u32(inner);
            }
            Node::Binary(kind, left, right) => {
                let left = self.node(left);
                let right = self.node(right);
                rec.put_u8(5);
                rec.put_u8(match kind {
                    BinaryKind::And => 0,
                    BinaryKind::Or => 1,
                    BinaryKind::Semicolon => 2,
                    BinaryKind::While => 3,
                    BinaryKind::Until => 4,
                });
                rec.put_u32(left);
                rec.put_u32(right);
            }
            Node::If(i) => {
                let test = self.node(&i.test);
                let then = self.node(&i.then);
                let otherwise = self.opt_node(i.otherwise.as_ref());
                rec.put_u8(6);
                rec.put_u32(test);
                rec.put_u32(then);
                rec.put_u32(otherwise);
            }
            Node::For(f) => {
                let body = self.node(&f.body);
                rec.put_u8(7);
                self.put_str(rec, &f.var);
                match &f.words {
                    Some(words) => {
                        rec.put_u8(1);
                        self.words(rec, words);
                    }
                    None => rec.put_u8(0),
                }
                rec.put_u32(body);
                rec.put_u32(f.line as u32);
            }
            Node::Case(c) => {
                let bodies: Vec<u32> = c
                    .clauses
                    .iter()
                    .map(|cl| self.opt_node(cl.body.as_ref()))
                    .collect();
                rec.put_u8(8);
                self.word(rec, &c.subject);
                rec.put_u32(c.line as u32);
                rec.put_u32(c.clauses.len() as u32);
                for (clause, body) in c.clauses.iter().zip(bodies) {
                    self.words(rec, &clause.patterns);
                    rec.put_u32(body);
                }
            }
            Node::FunctionDef(def) => {
                let body = self.node(&def.body);
                rec.put_u8(9);
                self.put_str(rec, &def.name);
                rec.put_u32(body);
                rec.put_u32(def.line as u32);
            }
            Node::Not(inner) => {
                let inner = self.node(inner);
                rec.put_u8(10);
                rec.put_u32(inner);
            }
        }
    }

    fn redirs(&mut self, rec: &mut BytesMut, redirs: &[Redir]) {
        rec.put_u32(redirs.len() as u32);
        for r in redirs {
            match r {
                Redir::File { fd, mode, target } => {
                    rec.put_u8(0);
                    rec.put_i32(*fd);
                    rec.put_u8(match mode {
                        FileMode::Read => 0,
                        FileMode::Write => 1,
                        FileMode::Clobber => 2,
                        FileMode::Append => 3,
                        FileMode::ReadWrite => 4,
                    });
                    self.word(rec, target);
                }
                Redir::Dup { fd, output, target } => {
                    rec.put_u8(1);
                    rec.put_i32(*fd);
                    rec.put_u8(*output as u8);
                    self.word(rec, target);
                }
                Redir::HereDoc { fd, doc } => {
                    rec.put_u8(2);
                    rec.put_i32(*fd);
                    rec.put_u32(doc.id as u32);
                    self.put_str(rec, &doc.delimiter);
                    rec.put_u8(doc.quoted as u8);
                    rec.put_u8(doc.strip_tabs as u8);
                    self.word(rec, &doc.body);
                }
            }
        }
    }

    fn words(&mut self, rec: &mut BytesMut, words: &[Word]) {
        rec.put_u32(words.len() as u32);
        for w in words {
            self.word(rec, w);
        }
    }

    fn word(&mut self, rec: &mut BytesMut, word: &Word) {
        self.parts(rec, &word.parts);
    }

    fn opt_word(&mut self, rec: &mut BytesMut, word: Option<&Word>) {
        match word {
            Some(w) => {
                rec.put_u8(1);
                self.word(rec, w);
            }
            None => rec.put_u8(0),
        }
    }

    fn parts(&mut self, rec: &mut BytesMut, parts: &[WordPart]) {
        rec.put_u32(parts.len() as u32);
        for part in parts {
            match part {
                WordPart::Literal(s) => {
                    rec.put_u8(0);
                    self.put_str(rec, s);
                }
                WordPart::Escaped(c) => {
                    rec.put_u8(1);
                    rec.put_u32(*c as u32);
                }
                WordPart::SingleQuoted(s) => {
                    rec.put_u8(2);
                    self.put_str(rec, s);
                }
                WordPart::DoubleQuoted(inner) => {
                    rec.put_u8(3);
                    self.parts(rec, inner);
                }
                WordPart::Tilde(user) => {
                    rec.put_u8(4);
                    self.put_str(rec, user);
                }
                WordPart::Param(pe) => {
                    rec.put_u8(5);
                    self.put_str(rec, &pe.name);
                    rec.put_u8(pe.braced as u8);
                    self.param_op(rec, &pe.op);
                }
                WordPart::CommandSubst(node) => {
                    let index = self.node(node);
                    rec.put_u8(6);
                    rec.put_u32(index);
                }
                WordPart::Arith(w) => {
                    rec.put_u8(7);
                    self.word(rec, w);
                }
                WordPart::ProcSubst { output, body } => {
                    let index = self.node(body);
                    rec.put_u8(8);
                    rec.put_u8(*output as u8);
                    rec.put_u32(index);
                }
            }
        }
    }

    fn param_op(&mut self, rec: &mut BytesMut, op: &ParamOp) {
        match op {
            ParamOp::Plain => rec.put_u8(0),
            ParamOp::Length => rec.put_u8(1),
            ParamOp::Default { colon, word } => {
                rec.put_u8(2);
                rec.put_u8(*colon as u8);
                self.word(rec, word);
            }
            ParamOp::Assign { colon, word } => {
                rec.put_u8(3);
                rec.put_u8(*colon as u8);
                self.word(rec, word);
            }
            ParamOp::Error { colon, word } => {
                rec.put_u8(4);
                rec.put_u8(*colon as u8);
                self.opt_word(rec, word.as_ref());
            }
            ParamOp::Alternate { colon, word } => {
                rec.put_u8(5);
                rec.put_u8(*colon as u8);
                self.word(rec, word);
            }
            ParamOp::TrimPrefix { longest, pattern } => {
                rec.put_u8(6);
                rec.put_u8(*longest as u8);
                self.word(rec, pattern);
            }
            ParamOp::TrimSuffix { longest, pattern } => {
                rec.put_u8(7);
                rec.put_u8(*longest as u8);
                self.word(rec, pattern);
            }
            ParamOp::Substring { offset, length } => {
                rec.put_u8(8);
                self.word(rec, offset);
                self.opt_word(rec, length.as_ref());
            }
            ParamOp::Replace {
                mode,
                pattern,
                replacement,
            } => {
                rec.put_u8(9);
                rec.put_u8(match mode {
                    ReplaceMode::First => 0,
                    ReplaceMode::All => 1,
                    ReplaceMode::Prefix => 2,
                    ReplaceMode::Suffix => 3,
                });
                self.word(rec, pattern);
                self.word(rec, replacement);
            }
        }
    }

    fn state(&mut self, buf: &mut BytesMut, state: &State) {
        buf.put_u32(state.vars.len() as u32);
        for (name, var) in &state.vars {
            self.put_str(buf, name);
            self.put_opt_str(buf, var.value.as_deref());
            buf.put_u8((var.exported as u8) | ((var.readonly as u8) << 1));
            buf.put_u8(match var.origin {
                Origin::Default => 0,
                Origin::Environment => 1,
                Origin::Shell => 2,
            });
            buf.put_u8(match var.dynamic {
                None => 0,
                Some(Dynamic::Random) => 1,
                Some(Dynamic::LineNo) => 2,
                Some(Dynamic::FuncName) => 3,
                Some(Dynamic::Seconds) => 4,
            });
        }
        self.put_pairs(buf, &state.aliases);
        let functions: Vec<(u32, u32)> = state
            .functions
            .iter()
            .map(|(name, body)| (self.string(name), self.node(body)))
            .collect();
        buf.put_u32(functions.len() as u32);
        for (name, body) in functions {
            buf.put_u32(name);
            buf.put_u32(body);
        }
        self.put_pairs(buf, &state.cmd_cache);
        self.put_strs(buf, &state.history);
        self.put_strs(buf, &state.positional);
        self.put_str(buf, &state.arg0);
        self.put_str(buf, &state.name);
        buf.put_u32(state.options);
        buf.put_i32(state.last_status);
        buf.put_i32(state.last_bg_pid.unwrap_or(-1));
        buf.put_i32(state.shell_pid);
        buf.put_u32(state.lineno);
        buf.put_u32(state.func_depth);
        buf.put_u32(state.loop_depth);
        self.put_strs(buf, &state.funcnames);
        buf.put_u32(state.traps.len() as u32);
        for (slot, action) in &state.traps {
            buf.put_u32(*slot as u32);
            self.put_str(buf, action);
        }
        buf.put_i64(state.seconds_base);
        buf.put_u8(state.fork_emulation as u8);
    }

    fn continuation(&mut self, buf: &mut BytesMut, cont: &Continuation<'_>) {
        buf.put_u8(kind_tag(cont.kind()));
        match cont {
            Continuation::Subshell(n) | Continuation::PipelineStage(n) | Continuation::CommandSubst(n) => {
                let index = self.node(n);
                buf.put_u32(index);
            }
            Continuation::HereDocWriter(text) => self.put_str(buf, text),
            Continuation::ExecExternal { path, argv, env } => {
                self.put_str(buf, path);
                self.put_strs(buf, argv);
                self.put_pairs(buf, env);
            }
        }
    }

    fn setup(&mut self, buf: &mut BytesMut, setup: &ChildSetup) {
        buf.put_u32(setup.dups.len() as u32);
        for (from, to) in &setup.dups {
            buf.put_i32(*from);
            buf.put_i32(*to);
        }
        buf.put_u32(setup.close.len() as u32);
        for fd in &setup.close {
            buf.put_i32(*fd);
        }
        buf.put_i32(setup.pgid.unwrap_or(-1));
        buf.put_u8((setup.foreground as u8) | ((setup.background as u8) << 1));
    }
}

/// Packs `state`, the continuation and the descriptor setup into a block.
pub fn encode(state: &State, cont: &Continuation<'_>, setup: &ChildSetup) -> Bytes {
    let mut enc = Encoder::default();
    let mut rest = BytesMut::new();
    enc.state(&mut rest, state);
    enc.continuation(&mut rest, cont);
    enc.setup(&mut rest, setup);

    let mut body = BytesMut::new();
    body.put_u32(enc.strings.len() as u32);
    for s in &enc.strings {
        body.put_u32(s.len() as u32);
        body.put_slice(s.as_bytes());
    }
    body.put_u32(enc.node_count);
    body.put(enc.nodes);
    body.put(rest);

    let mut block = BytesMut::with_capacity(HEADER_LEN + body.len());
    block.put_slice(MAGIC);
    block.put_u16(VERSION);
    block.put_u8(kind_tag(cont.kind()));
    block.put_u8(0);
    block.put_u32(body.len() as u32);
    block.put_u64(fnv1a(&body));
    block.put(body);
    block.freeze()
}

// ---------------------------------------------------------------- decoding

struct Decoder<'a> {
    buf: &'a [u8],
    strings: Vec<String>,
    nodes: Vec<Option<Node>>,
}

impl<'a> Decoder<'a> {
    fn need(&self, n: usize) -> Result<(), DecodeError> {
        if self.buf.remaining() < n {
            Err(DecodeError::Truncated)
        } else {
            Ok(())
        }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn bool(&mut self) -> Result<bool, DecodeError> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    /// A count of items that each take at least `min` bytes, rejected early
    /// if the block cannot possibly hold them.
    fn count(&mut self, min: usize) -> Result<usize, DecodeError> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min) > self.buf.remaining() {
            return Err(DecodeError::Truncated);
        }
        Ok(n)
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        let i = self.u32()?;
        self.strings
            .get(i as usize)
            .cloned()
            .ok_or(DecodeError::StringIndex(i))
    }

    fn opt_str(&mut self) -> Result<Option<String>, DecodeError> {
        let i = self.u32()?;
        if i == NONE {
            return Ok(None);
        }
        self.strings
            .get(i as usize)
            .cloned()
            .map(Some)
            .ok_or(DecodeError::StringIndex(i))
    }

    fn strs(&mut self) -> Result<Vec<String>, DecodeError> {
        let n = self.count(4)?;
        (0..n).map(|_| self.str()).collect()
    }

    fn pairs(&mut self) -> Result<Vec<(String, String)>, DecodeError> {
        let n = self.count(8)?;
        (0..n).map(|_| Ok((self.str()?, self.str()?))).collect()
    }

    fn string_table(&mut self) -> Result<(), DecodeError> {
        let n = self.count(4)?;
        for _ in 0..n {
            let len = self.u32()? as usize;
            self.need(len)?;
            let bytes = self.buf[..len].to_vec();
            self.buf.advance(len);
            self.strings
                .push(String::from_utf8(bytes).map_err(|_| DecodeError::Utf8)?);
        }
        Ok(())
    }

    /// Claims node `i`, which must already be decoded and unclaimed.
    fn take_node(&mut self, i: u32) -> Result<Node, DecodeError> {
        let slot = self.nodes.get_mut(i as usize).ok_or(DecodeError::NodeIndex(i))?;
        slot.take().ok_or(DecodeError::SharedNode(i))
    }

    fn node_ref(&mut self) -> Result<Node, DecodeError> {
        let i = self.u32()?;
        self.take_node(i)
    }

    fn opt_node_ref(&mut self) -> Result<Option<Node>, DecodeError> {
        let i = self.u32()?;
        if i == NONE {
            return Ok(None);
        }
        self.take_node(i).map(Some)
    }

    fn node_arena(&mut self) -> Result<(), DecodeError> {
        let n = self.count(1)?;
        for _ in 0..n {
            let node = self.node_record()?;
            self.nodes.push(Some(node));
        }
        Ok(())
    }

    fn node_record(&mut self) -> Result<Node, DecodeError> {
        let tag = self.u8()?;
        Ok(match tag {
            0 => {
                let line = self.u32()? as usize;
                let assigns = self.words()?;
                let args = self.words()?;
                let redirs = self.redirs()?;
                Node::Command(Command {
                    assigns,
                    args,
                    redirs,
                    line,
                })
            }
            1 => {
                let background = self.bool()?;
                let n = self.count(4)?;
                let commands = (0..n).map(|_| self.node_ref()).collect::<Result<_, _>>()?;
                Node::Pipe(Pipeline { commands, background })
            }
            2 => {
                let inner = self.node_ref()?;
                let redirs = self.redirs()?;
                Node::Redirect(Box::new(inner), redirs)
            }
            3 => Node::Background(Box::new(self.node_ref()?)),
            4 => Node::Subshell(Box::new(self.node_ref()?)),
            5 => {
                let kind = match self.u8()? {
                    0 => BinaryKind::And,
                    1 => BinaryKind::Or,
                    2 => BinaryKind::Semicolon,
                    3 => BinaryKind::While,
                    4 => BinaryKind::Until,
                    tag => return Err(DecodeError::Tag { what: "binary", tag }),
                };
                let left = self.node_ref()?;
                let right = self.node_ref()?;
                Node::Binary(kind, Box::new(left), Box::new(right))
            }
            6 => {
                let test = self.node_ref()?;
                let then = self.node_ref()?;
                let otherwise = self.opt_node_ref()?;
                Node::If(Box::new(If { test, then, otherwise }))
            }
            7 => {
                let var = self.str()?;
                let words = if self.bool()? { Some(self.words()?) } else { None };
                let body = self.node_ref()?;
                let line = self.u32()? as usize;
                Node::For(Box::new(For { var, words, body, line }))
            }
            8 => {
                let subject = self.word()?;
                let line = self.u32()? as usize;
                let n = self.count(8)?;
                let mut clauses = Vec::with_capacity(n);
                for _ in 0..n {
                    let patterns = self.words()?;
                    let body = self.opt_node_ref()?;
                    clauses.push(Clause { patterns, body });
                }
                Node::Case(Box::new(Case { subject, clauses, line }))
            }
            9 => {
                let name = self.str()?;
                let body = self.node_ref()?;
                let line = self.u32()? as usize;
                Node::FunctionDef(FunctionDef {
                    name,
                    body: Rc::new(body),
                    line,
                })
            }
            10 => Node::Not(Box::new(self.node_ref()?)),
            tag => return Err(DecodeError::Tag { what: "node", tag }),
        })
    }

    fn redirs(&mut self) -> Result<Vec<Redir>, DecodeError> {
        let n = self.count(5)?;
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let tag = self.u8()?;
            let fd = self.i32()?;
            out.push(match tag {
                0 => {
                    let mode = match self.u8()? {
                        0 => FileMode::Read,
                        1 => FileMode::Write,
                        2 => FileMode::Clobber,
                        3 => FileMode::Append,
                        4 => FileMode::ReadWrite,
                        tag => return Err(DecodeError::Tag { what: "file mode", tag }),
                    };
                    Redir::File {
                        fd,
                        mode,
                        target: self.word()?,
                    }
                }
                1 => {
                    let output = self.bool()?;
                    Redir::Dup {
                        fd,
                        output,
                        target: self.word()?,
                    }
                }
                2 => {
                    let id = self.u32()? as usize;
                    let delimiter = self.str()?;
                    let quoted = self.bool()?;
                    let strip_tabs = self.bool()?;
                    let body = self.word()?;
                    Redir::HereDoc {
                        fd,
                        doc: HereDoc {
                            id,
                            delimiter,
                            quoted,
                            strip_tabs,
                            body,
                        },
                    }
                }
                tag => return Err(DecodeError::Tag { what: "redirection", tag }),
            });
        }
        Ok(out)
    }

    fn words(&mut self) -> Result<Vec<Word>, DecodeError> {
        let n = self.count(4)?;
        (0..n).map(|_| self.word()).collect()
    }

    fn word(&mut self) -> Result<Word, DecodeError> {
        Ok(Word { parts: self.parts()? })
    }

    fn opt_word(&mut self) -> Result<Option<Word>, DecodeError> {
        if self.bool()? {
            self.word().map(Some)
        } else {
            Ok(None)
        }
    }

    fn parts(&mut self) -> Result<Vec<WordPart>, DecodeError> {
        let n = self.count(1)?;
        let mut parts = Vec::with_capacity(n);
        for _ in 0..n {
            let tag = self.u8()?;
            parts.push(match tag {
                0 => WordPart::Literal(self.str()?),
                1 => {
                    let code = self.u32()?;
                    let c = char::from_u32(code).ok_or(DecodeError::Tag { what: "char", tag })?;
                    WordPart::Escaped(c)
                }
                2 => WordPart::SingleQuoted(self.str()?),
                3 => WordPart::DoubleQuoted(self.parts()?),
                4 => WordPart::Tilde(self.str()?),
                5 => {
                    let name = self.str()?;
                    let braced = self.bool()?;
                    let op = self.param_op()?;
                    WordPart::Param(Box::new(ParamExp { name, op, braced }))
                }
                6 => WordPart::CommandSubst(Box::new(self.node_ref()?)),
                7 => WordPart::Arith(self.word()?),
                8 => {
                    let output = self.bool()?;
                    WordPart::ProcSubst {
                        output,
                        body: Box::new(self.node_ref()?),
                    }
                }
                tag => return Err(DecodeError::Tag { what: "word part", tag }),
            });
        }
        Ok(parts)
    }

    fn param_op(&mut self) -> Result<ParamOp, DecodeError> {
        let tag = self.u8()?;
        Ok(match tag {
            0 => ParamOp::Plain,
            1 => ParamOp::Length,
            2 => ParamOp::Default {
                colon: self.bool()?,
                word: self.word()?,
            },
            3 => ParamOp::Assign {
                colon: self.bool()?,
                word: self.word()?,
            },
            4 => ParamOp::Error {
                colon: self.bool()?,
                word: self.opt_word()?,
            },
            5 => ParamOp::Alternate {
                colon: self.bool()?,
                word: self.word()?,
            },
            6 => ParamOp::TrimPrefix {
                longest: self.bool()?,
                pattern: self.word()?,
            },
            7 => ParamOp::TrimSuffix {
                longest: self.bool()?,
                pattern: self.word()?,
            },
            8 => ParamOp::Substring {
                offset: self.word()?,
                length: self.opt_word()?,
            },
            9 => {
                let mode = match self.u8()? {
                    0 => ReplaceMode::First,
                    1 => ReplaceMode::All,
                    2 => ReplaceMode::Prefix,
                    3 => ReplaceMode::Suffix,
                    tag => return Err(DecodeError::Tag { what: "replace mode", tag }),
                };
                ParamOp::Replace {
                    mode,
                    pattern: self.word()?,
                    replacement: self.word()?,
                }
            }
            tag => return Err(DecodeError::Tag { what: "parameter op", tag }),
        })
    }

    fn state(&mut self) -> Result<State, DecodeError> {
        let mut state = State::default();
        let n = self.count(11)?;
        for _ in 0..n {
            let name = self.str()?;
            let value = self.opt_str()?;
            let flags = self.u8()?;
            let origin = match self.u8()? {
                0 => Origin::Default,
                1 => Origin::Environment,
                2 => Origin::Shell,
                tag => return Err(DecodeError::Tag { what: "origin", tag }),
            };
            let dynamic = match self.u8()? {
                0 => None,
                1 => Some(Dynamic::Random),
                2 => Some(Dynamic::LineNo),
                3 => Some(Dynamic::FuncName),
                4 => Some(Dynamic::Seconds),
                tag => return Err(DecodeError::Tag { what: "dynamic", tag }),
            };
            let mut var = Var::new(value);
            var.exported = flags & 1 != 0;
            var.readonly = flags & 2 != 0;
            var.origin = origin;
            var.dynamic = dynamic;
            var.hook = crate::vars::hook_for(&name);
            state.vars.push((name, var));
        }
        state.aliases = self.pairs()?;
        let n = self.count(8)?;
        for _ in 0..n {
            let name = self.str()?;
            let body = self.node_ref()?;
            state.functions.push((name, Rc::new(body)));
        }
        state.cmd_cache = self.pairs()?;
        state.history = self.strs()?;
        state.positional = self.strs()?;
        state.arg0 = self.str()?;
        state.name = self.str()?;
        state.options = self.u32()?;
        state.last_status = self.i32()?;
        let bg = self.i32()?;
        state.last_bg_pid = (bg >= 0).then_some(bg);
        state.shell_pid = self.i32()?;
        state.lineno = self.u32()?;
        state.func_depth = self.u32()?;
        state.loop_depth = self.u32()?;
        state.funcnames = self.strs()?;
        let n = self.count(8)?;
        for _ in 0..n {
            let slot = self.u32()? as usize;
            let action = self.str()?;
            state.traps.push((slot, action));
        }
        state.seconds_base = self.i64()?;
        state.fork_emulation = self.bool()?;
        Ok(state)
    }

    fn continuation(&mut self) -> Result<OwnedContinuation, DecodeError> {
        let tag = self.u8()?;
        Ok(match tag {
            0 => OwnedContinuation::Subshell(self.node_ref()?),
            1 => OwnedContinuation::PipelineStage(self.node_ref()?),
            2 => OwnedContinuation::CommandSubst(self.node_ref()?),
            3 => OwnedContinuation::HereDocWriter(self.str()?),
            4 => OwnedContinuation::ExecExternal {
                path: self.str()?,
                argv: self.strs()?,
                env: self.pairs()?,
            },
            tag => return Err(DecodeError::Tag { what: "continuation", tag }),
        })
    }

    fn setup(&mut self) -> Result<ChildSetup, DecodeError> {
        let n = self.count(8)?;
        let mut dups = Vec::with_capacity(n);
        for _ in 0..n {
            dups.push((self.i32()?, self.i32()?));
        }
        let n = self.count(4)?;
        let mut close = Vec::with_capacity(n);
        for _ in 0..n {
            close.push(self.i32()?);
        }
        let pgid = self.i32()?;
        let flags = self.u8()?;
        Ok(ChildSetup {
            dups,
            close,
            pgid: (pgid >= 0).then_some(pgid),
            foreground: flags & 1 != 0,
            background: flags & 2 != 0,
        })
    }
}

/// Rebuilds a snapshot, validating every index before anything is used.
pub fn decode(block: &[u8]) -> Result<Snapshot, DecodeError> {
    if block.len() < HEADER_LEN {
        return Err(DecodeError::Truncated);
    }
    let mut header = &block[..HEADER_LEN];
    if &header[..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    header.advance(4);
    let version = header.get_u16();
    if version != VERSION {
        return Err(DecodeError::Version(version));
    }
    let kind = header.get_u8();
    header.advance(1);
    let len = header.get_u32() as usize;
    let checksum = header.get_u64();
    let body = &block[HEADER_LEN..];
    if body.len() < len {
        return Err(DecodeError::Truncated);
    }
    if body.len() > len {
        return Err(DecodeError::Trailing(body.len() - len));
    }
    if fnv1a(body) != checksum {
        return Err(DecodeError::Checksum);
    }

    let mut dec = Decoder {
        buf: body,
        strings: Vec::new(),
        nodes: Vec::new(),
    };
    dec.string_table()?;
    dec.node_arena()?;
    let state = dec.state()?;
    let continuation = dec.continuation()?;
    if kind_tag(continuation.as_continuation().kind()) != kind {
        return Err(DecodeError::Tag { what: "header kind", tag: kind });
    }
    let setup = dec.setup()?;
    if dec.buf.has_remaining() {
        return Err(DecodeError::Trailing(dec.buf.remaining()));
    }
    let unused = dec.nodes.iter().filter(|n| n.is_some()).count();
    if unused > 0 {
        return Err(DecodeError::UnusedNodes(unused));
    }
    Ok(Snapshot {
        state,
        continuation,
        setup,
    })
}
