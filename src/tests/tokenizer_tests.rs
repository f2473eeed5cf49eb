use crate::parser::Parser;
use crate::tokenizer::{Op, Token};
use crate::word::{ParamOp, Word, WordPart};

fn tokens(input: &str) -> Result<Vec<Token>, String> {
    let mut parser = Parser::from_string(input, None);
    let mut out = Vec::new();
    loop {
        match parser.read_token().map_err(|e| e.to_string())? {
            Token::Eof => return Ok(out),
            tok => out.push(tok),
        }
    }
}

fn word(s: &str) -> Token {
    Token::Word(Word::literal(s))
}

#[test]
fn test_escape_character() -> Result<(), String> {
    let toks = tokens(r"echo Hello\ World")?;
    assert_eq!(toks.len(), 2);
    assert_eq!(toks[0], word("echo"));
    let Token::Word(w) = &toks[1] else {
        return Err(format!("expected a word, got {:?}", toks[1]));
    };
    assert_eq!(
        w.parts,
        vec![
            WordPart::Literal("Hello".into()),
            WordPart::Escaped(' '),
            WordPart::Literal("World".into()),
        ]
    );
    assert_eq!(w.unquoted_text(), "Hello World");
    Ok(())
}

#[test]
fn test_single_and_double_quotes() -> Result<(), String> {
    let toks = tokens(r#"echo 'a "b"' "c 'd'""#)?;
    assert_eq!(
        toks[1],
        Token::Word(Word {
            parts: vec![WordPart::SingleQuoted("a \"b\"".into())]
        })
    );
    assert_eq!(
        toks[2],
        Token::Word(Word {
            parts: vec![WordPart::DoubleQuoted(vec![WordPart::Literal("c 'd'".into())])]
        })
    );
    Ok(())
}

#[test]
fn test_operators() -> Result<(), String> {
    let toks = tokens("a && b || c | d; e & f ;; (g) >| h")?;
    let ops: Vec<Op> = toks
        .iter()
        .filter_map(|t| match t {
            Token::Op(op) => Some(*op),
            _ => None,
        })
        .collect();
    assert_eq!(
        ops,
        vec![
            Op::AndIf,
            Op::OrIf,
            Op::Pipe,
            Op::Semi,
            Op::Amp,
            Op::DSemi,
            Op::LParen,
            Op::RParen,
            Op::Clobber
        ]
    );
    Ok(())
}

#[test]
fn test_io_numbers() -> Result<(), String> {
    let toks = tokens("cmd 2>err 3<&0 12 >out")?;
    assert_eq!(
        toks,
        vec![
            word("cmd"),
            Token::IoNumber(2),
            Token::Op(Op::Great),
            word("err"),
            Token::IoNumber(3),
            Token::Op(Op::LessAnd),
            word("0"),
            word("12"),
            Token::Op(Op::Great),
            word("out"),
        ]
    );
    Ok(())
}

#[test]
fn test_comments_and_newlines() -> Result<(), String> {
    let toks = tokens("echo a # not this\necho b")?;
    assert_eq!(toks, vec![word("echo"), word("a"), Token::Newline, word("echo"), word("b")]);
    Ok(())
}

#[test]
fn test_line_continuation() -> Result<(), String> {
    let toks = tokens("ec\\\nho hi")?;
    assert_eq!(toks, vec![word("echo"), word("hi")]);
    Ok(())
}

#[test]
fn test_parameter_forms() -> Result<(), String> {
    let toks = tokens("$a ${b:-x} ${#c} ${d%%.*} $1 $@")?;
    let ops: Vec<ParamOp> = toks
        .iter()
        .map(|t| match t {
            Token::Word(w) => match &w.parts[..] {
                [WordPart::Param(pe)] => Ok(pe.op.clone()),
                other => Err(format!("unexpected parts {:?}", other)),
            },
            other => Err(format!("unexpected token {:?}", other)),
        })
        .collect::<Result<_, _>>()?;
    assert_eq!(ops[0], ParamOp::Plain);
    assert!(matches!(&ops[1], ParamOp::Default { colon: true, word } if word.as_literal() == Some("x")));
    assert_eq!(ops[2], ParamOp::Length);
    assert!(matches!(&ops[3], ParamOp::TrimSuffix { longest: true, .. }));
    assert_eq!(toks[4].to_string(), "\"$1\"");
    assert_eq!(toks[5].to_string(), "\"$@\"");
    Ok(())
}

#[test]
fn test_tilde_only_at_word_start() -> Result<(), String> {
    let toks = tokens("~/bin a~b ~user")?;
    let Token::Word(first) = &toks[0] else {
        return Err("expected word".into());
    };
    assert_eq!(first.parts[0], WordPart::Tilde(String::new()));
    assert_eq!(toks[1], word("a~b"));
    let Token::Word(third) = &toks[2] else {
        return Err("expected word".into());
    };
    assert_eq!(third.parts, vec![WordPart::Tilde("user".into())]);
    Ok(())
}

#[test]
fn test_ansi_c_quoting() -> Result<(), String> {
    let toks = tokens(r"$'a\tb\x41\n'")?;
    assert_eq!(
        toks,
        vec![Token::Word(Word {
            parts: vec![WordPart::SingleQuoted("a\tbA\n".into())]
        })]
    );
    Ok(())
}

#[test]
fn test_unterminated_quote() {
    let err = tokens("echo 'abc").unwrap_err();
    assert!(err.contains("Unterminated quoted string"), "{}", err);
    let err = tokens("echo \"abc").unwrap_err();
    assert!(err.contains("Unterminated quoted string"), "{}", err);
}
