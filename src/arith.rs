//! Arithmetic expansion: C-like integer expressions over shell variables.

use crate::types::ShellError;

/// Variable access for the evaluator.
pub trait ArithEnv {
    fn get_var(&mut self, name: &str) -> Result<Option<String>, ShellError>;
    fn set_var(&mut self, name: &str, value: i64) -> Result<(), ShellError>;
}

/// Nested variable values are themselves expressions; bound the recursion.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(i64),
    Ident(String),
    Op(&'static str),
    LParen,
    RParen,
    Question,
    Colon,
    Comma,
}

const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=", "*=",
    "/=", "%=", "&=", "^=", "|=", "+", "-", "*", "/", "%", "<", ">", "=", "!", "~", "&", "^", "|",
];

fn err(message: impl Into<String>) -> ShellError {
    ShellError::Arithmetic(message.into())
}

/// Parses an integer constant: decimal, `0x` hex, leading-zero octal or
/// `base#digits`.
pub fn parse_number(text: &str) -> Option<i64> {
    let text = text.trim();
    let (neg, body) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let value = if let Some((base, digits)) = body.split_once('#') {
        let base: u32 = base.parse().ok()?;
        if !(2..=64).contains(&base) || digits.is_empty() {
            return None;
        }
        let mut v: i64 = 0;
        for c in digits.chars() {
            let d = match c {
                '0'..='9' => c as u32 - '0' as u32,
                'a'..='z' => c as u32 - 'a' as u32 + 10,
                'A'..='Z' if base <= 36 => c as u32 - 'A' as u32 + 10,
                'A'..='Z' => c as u32 - 'A' as u32 + 36,
                '@' => 62,
                '_' => 63,
                _ => return None,
            };
            if d >= base {
                return None;
            }
            v = v.wrapping_mul(base as i64).wrapping_add(d as i64);
        }
        v
    } else if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if body.len() > 1 && body.starts_with('0') {
        i64::from_str_radix(&body[1..], 8).ok()?
    } else if !body.is_empty() && body.bytes().all(|b| b.is_ascii_digit()) {
        body.parse::<u64>().ok()? as i64
    } else {
        return None;
    };
    Some(if neg { value.wrapping_neg() } else { value })
}

fn tokenize(text: &str) -> Result<Vec<Tok>, ShellError> {
    let chars: Vec<char> = text.chars().collect();
    let mut toks = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '#' || chars[i] == '@' || chars[i] == '_') {
                i += 1;
            }
            let lit: String = chars[start..i].iter().collect();
            let n = parse_number(&lit).ok_or_else(|| err(format!("expecting primary: \"{}\"", text)))?;
            toks.push(Tok::Num(n));
            continue;
        }
        if c == '_' || c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i] == '_' || chars[i].is_ascii_alphanumeric()) {
                i += 1;
            }
            toks.push(Tok::Ident(chars[start..i].iter().collect()));
            continue;
        }
        match c {
            '(' => toks.push(Tok::LParen),
            ')' => toks.push(Tok::RParen),
            '?' => toks.push(Tok::Question),
            ':' => toks.push(Tok::Colon),
            ',' => toks.push(Tok::Comma),
            _ => {
                let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| err(format!("syntax error: \"{}\"", text)))?;
                toks.push(Tok::Op(op));
                i += op.chars().count();
                continue;
            }
        }
        i += 1;
    }
    Ok(toks)
}

#[derive(Debug, Clone)]
enum Expr {
    Num(i64),
    Var(String),
    Unary(&'static str, Box<Expr>),
    /// `++x` / `--x` (`prefix`) or `x++` / `x--`.
    Step { name: String, delta: i64, prefix: bool },
    Binary(&'static str, Box<Expr>, Box<Expr>),
    /// `name = e` or `name op= e`; the operator is `=` or the compound one.
    Assign(String, &'static str, Box<Expr>),
    Cond(Box<Expr>, Box<Expr>, Box<Expr>),
    Comma(Box<Expr>, Box<Expr>),
}

fn binary_prec(op: &str) -> Option<(u8, bool)> {
    // (precedence, right associative)
    Some(match op {
        "||" => (3, false),
        "&&" => (4, false),
        "|" => (5, false),
        "^" => (6, false),
        "&" => (7, false),
        "==" | "!=" => (8, false),
        "<" | "<=" | ">" | ">=" => (9, false),
        "<<" | ">>" => (10, false),
        "+" | "-" => (11, false),
        "*" | "/" | "%" => (12, false),
        "**" => (13, true),
        _ => return None,
    })
}

fn is_assign_op(op: &str) -> bool {
    matches!(
        op,
        "=" | "+=" | "-=" | "*=" | "/=" | "%=" | "<<=" | ">>=" | "&=" | "^=" | "|="
    )
}

struct ExprParser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    text: &'a str,
}

impl ExprParser<'_> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn syntax(&self) -> ShellError {
        err(format!("syntax error: \"{}\"", self.text))
    }

    fn comma(&mut self) -> Result<Expr, ShellError> {
        let mut left = self.assignment()?;
        while self.peek() == Some(&Tok::Comma) {
            self.bump();
            let right = self.assignment()?;
            left = Expr::Comma(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn assignment(&mut self) -> Result<Expr, ShellError> {
        if let (Some(Tok::Ident(name)), Some(Tok::Op(op))) =
            (self.toks.get(self.pos), self.toks.get(self.pos + 1))
        {
            if is_assign_op(op) {
                let (name, op) = (name.clone(), *op);
                self.pos += 2;
                let value = self.assignment()?;
                return Ok(Expr::Assign(name, op, Box::new(value)));
            }
        }
        self.conditional()
    }

    fn conditional(&mut self) -> Result<Expr, ShellError> {
        let cond = self.binary(3)?;
        if self.peek() != Some(&Tok::Question) {
            return Ok(cond);
        }
        self.bump();
        let then = self.comma()?;
        if self.bump() != Some(Tok::Colon) {
            return Err(self.syntax());
        }
        let otherwise = self.assignment()?;
        Ok(Expr::Cond(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    fn binary(&mut self, min_prec: u8) -> Result<Expr, ShellError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Op(op)) => *op,
                _ => break,
            };
            let Some((prec, right_assoc)) = binary_prec(op) else {
                break;
            };
            if prec < min_prec {
                break;
            }
            self.bump();
            let next = if right_assoc { prec } else { prec + 1 };
            let right = self.binary(next)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ShellError> {
        match self.peek().cloned() {
            Some(Tok::Op(op @ ("++" | "--"))) => {
                self.bump();
                match self.bump() {
                    Some(Tok::Ident(name)) => Ok(Expr::Step {
                        name,
                        delta: if op == "++" { 1 } else { -1 },
                        prefix: true,
                    }),
                    _ => Err(self.syntax()),
                }
            }
            Some(Tok::Op(op @ ("+" | "-" | "!" | "~"))) => {
                self.bump();
                let inner = self.unary()?;
                Ok(Expr::Unary(op, Box::new(inner)))
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, ShellError> {
        match self.bump() {
            Some(Tok::Num(n)) => Ok(Expr::Num(n)),
            Some(Tok::Ident(name)) => {
                if let Some(Tok::Op(op @ ("++" | "--"))) = self.peek().cloned() {
                    self.bump();
                    return Ok(Expr::Step {
                        name,
                        delta: if op == "++" { 1 } else { -1 },
                        prefix: false,
                    });
                }
                Ok(Expr::Var(name))
            }
            Some(Tok::LParen) => {
                let inner = self.comma()?;
                if self.bump() != Some(Tok::RParen) {
                    return Err(err(format!("missing ')': \"{}\"", self.text)));
                }
                Ok(inner)
            }
            _ => Err(err(format!("expecting primary: \"{}\"", self.text))),
        }
    }
}

struct Evaluator<'e> {
    env: &'e mut dyn ArithEnv,
    depth: usize,
    text: String,
}

impl Evaluator<'_> {
    fn var(&mut self, name: &str) -> Result<i64, ShellError> {
        let value = self.env.get_var(name)?.unwrap_or_default();
        let value = value.trim();
        if value.is_empty() {
            return Ok(0);
        }
        if let Some(n) = parse_number(value) {
            return Ok(n);
        }
        if self.depth >= MAX_DEPTH {
            return Err(err(format!("{}: expression recursion level exceeded", name)));
        }
        self.depth += 1;
        let result = eval_nested(value, self);
        self.depth -= 1;
        result
    }

    fn apply(&self, op: &str, a: i64, b: i64) -> Result<i64, ShellError> {
        Ok(match op {
            "+" => a.wrapping_add(b),
            "-" => a.wrapping_sub(b),
            "*" => a.wrapping_mul(b),
            "/" | "%" => {
                if b == 0 {
                    return Err(err(format!("division by zero: \"{}\"", self.text)));
                }
                if op == "/" {
                    a.wrapping_div(b)
                } else {
                    a.wrapping_rem(b)
                }
            }
            "**" => {
                if b < 0 {
                    return Err(err(format!("exponent less than 0: \"{}\"", self.text)));
                }
                a.wrapping_pow(b.min(u32::MAX as i64) as u32)
            }
            "<<" => a.wrapping_shl(b as u32),
            ">>" => a.wrapping_shr(b as u32),
            "<" => (a < b) as i64,
            "<=" => (a <= b) as i64,
            ">" => (a > b) as i64,
            ">=" => (a >= b) as i64,
            "==" => (a == b) as i64,
            "!=" => (a != b) as i64,
            "&" => a & b,
            "^" => a ^ b,
            "|" => a | b,
            _ => return Err(err(format!("syntax error: \"{}\"", self.text))),
        })
    }

    fn eval(&mut self, expr: &Expr) -> Result<i64, ShellError> {
        match expr {
            Expr::Num(n) => Ok(*n),
            Expr::Var(name) => self.var(name),
            Expr::Unary(op, inner) => {
                let v = self.eval(inner)?;
                Ok(match *op {
                    "-" => v.wrapping_neg(),
                    "!" => (v == 0) as i64,
                    "~" => !v,
                    _ => v,
                })
            }
            Expr::Step { name, delta, prefix } => {
                let old = self.var(name)?;
                let new = old.wrapping_add(*delta);
                self.env.set_var(name, new)?;
                Ok(if *prefix { new } else { old })
            }
            Expr::Binary("&&", l, r) => {
                Ok((self.eval(l)? != 0 && self.eval(r)? != 0) as i64)
            }
            Expr::Binary("||", l, r) => {
                Ok((self.eval(l)? != 0 || self.eval(r)? != 0) as i64)
            }
            Expr::Binary(op, l, r) => {
                let a = self.eval(l)?;
                let b = self.eval(r)?;
                self.apply(op, a, b)
            }
            Expr::Assign(name, op, value) => {
                let rhs = self.eval(value)?;
                let v = if *op == "=" {
                    rhs
                } else {
                    let cur = self.var(name)?;
                    self.apply(&op[..op.len() - 1], cur, rhs)?
                };
                self.env.set_var(name, v)?;
                Ok(v)
            }
            Expr::Cond(c, t, e) => {
                if self.eval(c)? != 0 {
                    self.eval(t)
                } else {
                    self.eval(e)
                }
            }
            Expr::Comma(l, r) => {
                self.eval(l)?;
                self.eval(r)
            }
        }
    }
}

fn parse(text: &str) -> Result<Option<Expr>, ShellError> {
    let toks = tokenize(text)?;
    if toks.is_empty() {
        return Ok(None);
    }
    let mut parser = ExprParser { toks, pos: 0, text };
    let expr = parser.comma()?;
    if parser.pos < parser.toks.len() {
        return Err(parser.syntax());
    }
    Ok(Some(expr))
}

fn eval_nested(text: &str, outer: &mut Evaluator<'_>) -> Result<i64, ShellError> {
    match parse(text)? {
        Some(expr) => outer.eval(&expr),
        None => Ok(0),
    }
}

/// Evaluates `text`. An empty expression is 0.
pub fn eval(text: &str, env: &mut dyn ArithEnv) -> Result<i64, ShellError> {
    let Some(expr) = parse(text)? else {
        return Ok(0);
    };
    let mut evaluator = Evaluator {
        env,
        depth: 0,
        text: text.to_string(),
    };
    evaluator.eval(&expr)
}
