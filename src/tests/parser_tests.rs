use std::collections::HashMap;

use crate::ast::{FileMode, Node, Redir};
use crate::parser::Parser;

fn parse(input: &str) -> Result<Node, String> {
    Parser::from_string(input, None)
        .parse_program()
        .map_err(|e| e.to_string())
}

fn reprint(input: &str) -> Result<String, String> {
    Ok(parse(input)?.to_string())
}

#[test]
fn test_lists_and_pipelines() -> Result<(), String> {
    assert_eq!(reprint("a && b || c")?, "a && b || c");
    assert_eq!(reprint("a | b | c")?, "a | b | c");
    assert_eq!(reprint("! a | b")?, "! a | b");
    assert_eq!(reprint("a; b")?, "a; b");
    assert_eq!(reprint("sleep 1 & echo x")?, "sleep 1 & echo x");
    assert_eq!(reprint("echo a\necho b\n")?, "echo a; echo b");
    Ok(())
}

#[test]
fn test_compound_commands() -> Result<(), String> {
    assert_eq!(reprint("if a; then b; else c; fi")?, "if a; then b; else c; fi");
    assert_eq!(reprint("while a\ndo\n  b\ndone")?, "while a; do b; done");
    assert_eq!(reprint("until a; do b; done")?, "until a; do b; done");
    assert_eq!(
        reprint("for i in 1 2; do echo $i; done")?,
        "for i in 1 2; do echo $i; done"
    );
    assert_eq!(
        reprint("case $x in a|b) echo ab;; *) ;; esac")?,
        "case $x in a|b) echo ab;; *);; esac"
    );
    assert_eq!(reprint("(cd /tmp && ls) > out")?, "(cd /tmp && ls) >out");
    Ok(())
}

#[test]
fn test_elif_nests_in_else() -> Result<(), String> {
    let Node::If(outer) = parse("if a; then b; elif c; then d; else e; fi")? else {
        return Err("expected if".into());
    };
    assert!(matches!(outer.otherwise, Some(Node::If(_))));
    Ok(())
}

#[test]
fn test_for_without_in() -> Result<(), String> {
    let Node::For(f) = parse("for arg do echo $arg; done")? else {
        return Err("expected for".into());
    };
    assert_eq!(f.var, "arg");
    assert!(f.words.is_none());
    Ok(())
}

#[test]
fn test_function_definitions() -> Result<(), String> {
    assert_eq!(reprint("f() { echo hi; }")?, "f() { echo hi; }");
    let Node::FunctionDef(def) = parse("function g { true; }")? else {
        return Err("expected function".into());
    };
    assert_eq!(def.name, "g");
    Ok(())
}

#[test]
fn test_assignments_and_redirections() -> Result<(), String> {
    let Node::Command(cmd) = parse("A=1 B=2 cmd arg 2>>log <in")? else {
        return Err("expected a simple command".into());
    };
    assert_eq!(cmd.assigns.len(), 2);
    assert_eq!(cmd.args.len(), 2);
    assert!(matches!(
        &cmd.redirs[0],
        Redir::File { fd: 2, mode: FileMode::Append, .. }
    ));
    assert!(matches!(&cmd.redirs[1], Redir::File { fd: 0, mode: FileMode::Read, .. }));
    Ok(())
}

#[test]
fn test_here_documents() -> Result<(), String> {
    let Node::Command(cmd) = parse("cat <<EOF\nhello $x\nEOF\necho after\n")
        .map(|n| match n {
            Node::Binary(_, left, _) => *left,
            other => other,
        })?
    else {
        return Err("expected a command".into());
    };
    let Redir::HereDoc { doc, .. } = &cmd.redirs[0] else {
        return Err("expected a here-document".into());
    };
    assert!(!doc.quoted);
    assert_eq!(doc.body.to_string(), "hello $x\n");

    let Node::Command(cmd) = parse("cat <<-'END'\n\tliteral $x\n\tEND\n")? else {
        return Err("expected a command".into());
    };
    let Redir::HereDoc { doc, .. } = &cmd.redirs[0] else {
        return Err("expected a here-document".into());
    };
    assert!(doc.quoted && doc.strip_tabs);
    assert_eq!(doc.body.unquoted_text(), "literal $x\n");
    Ok(())
}

#[test]
fn test_double_bracket_operands() -> Result<(), String> {
    let Node::Command(cmd) = parse("[[ a < b && -n x ]]")? else {
        return Err("expected a command".into());
    };
    let words: Vec<String> = cmd.args.iter().map(|w| w.to_string()).collect();
    assert_eq!(words, ["[[", "a", "<", "b", "&&", "-n", "x", "]]"]);
    Ok(())
}

#[test]
fn test_alias_expansion() -> Result<(), String> {
    let mut aliases = HashMap::new();
    aliases.insert("ll".to_string(), "ls -l ".to_string());
    aliases.insert("x".to_string(), "y".to_string());
    let mut parser = Parser::from_string("ll x\n", None);
    parser.set_aliases(&aliases);
    let node = parser.parse_program().map_err(|e| e.to_string())?;
    assert_eq!(node.to_string(), "ls -l y");
    Ok(())
}

#[test]
fn test_line_numbers() -> Result<(), String> {
    let Node::Binary(_, _, second) = parse("a\n\nb\n")? else {
        return Err("expected two commands".into());
    };
    let Node::Command(cmd) = *second else {
        return Err("expected a command".into());
    };
    assert_eq!(cmd.line, 3);
    Ok(())
}

#[test]
fn test_syntax_errors() {
    let err = parse("if true; then").unwrap_err();
    assert!(err.contains("end of file unexpected"), "{}", err);
    let err = parse("echo a |").unwrap_err();
    assert!(err.contains("end of file unexpected"), "{}", err);
    let err = parse("fi").unwrap_err();
    assert!(err.contains("\"fi\" unexpected"), "{}", err);
    let err = parse(";;").unwrap_err();
    assert!(err.contains("\";;\" unexpected"), "{}", err);
}

#[test]
fn test_parsing_is_deterministic() -> Result<(), String> {
    let inputs = [
        "for i in a \"b c\"; do case $i in a*) echo ${i%%x}; ;; *) : ;; esac; done | cat >out 2>&1 &",
        "f() { local x=$((1 + 2)); cat <<EOF\n$x `pwd`\nEOF\n}\nwhile ! f; do break; done",
        "if [ -n \"$1\" ]; then (cd /; ls) else { echo none; } fi",
    ];
    for input in inputs {
        assert_eq!(parse(input)?, parse(input)?);
    }
    Ok(())
}
