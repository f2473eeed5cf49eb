use std::fs;

use crate::arith;
use crate::ast::Node;
use crate::options::Opt;
use crate::parser::Parser;
use crate::shell::Shell;

fn shell() -> Shell {
    let mut shell = Shell::new("ashrs");
    shell.init_defaults();
    shell
}

/// Expands `text` the way it would be as the arguments of a command.
fn expand(shell: &mut Shell, text: &str) -> Result<Vec<String>, String> {
    let node = Parser::from_string(&format!("echo {}", text), None)
        .parse_program()
        .map_err(|e| e.to_string())?;
    let Node::Command(cmd) = node else {
        return Err(format!("not a simple command: {}", node));
    };
    shell.expand_args(&cmd.args[1..]).map_err(|e| e.to_string())
}

#[test]
fn test_field_splitting() -> Result<(), String> {
    let mut sh = shell();
    sh.set_var("x", "a b  c").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "$x")?, ["a", "b", "c"]);
    assert_eq!(expand(&mut sh, "\"$x\"")?, ["a b  c"]);
    assert_eq!(expand(&mut sh, "pre${x}post")?, ["prea", "b", "cpost"]);

    sh.set_var("IFS", ":").map_err(|e| e.to_string())?;
    sh.set_var("v", "a::b:").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "$v")?, ["a", "", "b"]);
    Ok(())
}

#[test]
fn test_empty_fields() -> Result<(), String> {
    let mut sh = shell();
    sh.set_var("e", "").map_err(|e| e.to_string())?;
    assert!(expand(&mut sh, "$e")?.is_empty());
    assert_eq!(expand(&mut sh, "\"$e\"")?, [""]);
    assert_eq!(expand(&mut sh, "''")?, [""]);
    Ok(())
}

#[test]
fn test_quote_removal() -> Result<(), String> {
    let mut sh = shell();
    assert_eq!(expand(&mut sh, r#"'a'"b"\c"#)?, ["abc"]);
    assert_eq!(expand(&mut sh, r#""\$x \"q\"""#)?, ["$x \"q\""]);
    Ok(())
}

#[test]
fn test_parameter_operators() -> Result<(), String> {
    let mut sh = shell();
    sh.set_var("empty", "").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "${unset:-def}")?, ["def"]);
    assert_eq!(expand(&mut sh, "\"${empty-def}\"")?, [""]);
    assert_eq!(expand(&mut sh, "${empty:-def}")?, ["def"]);
    assert_eq!(expand(&mut sh, "${empty:+alt}")?.len(), 0);
    assert_eq!(expand(&mut sh, "${assigned:=val}")?, ["val"]);
    assert_eq!(sh.get_var("assigned").as_deref(), Some("val"));
    let err = expand(&mut sh, "${missing?is required}").unwrap_err();
    assert!(err.contains("is required"), "{}", err);
    Ok(())
}

#[test]
fn test_trimming_and_length() -> Result<(), String> {
    let mut sh = shell();
    sh.set_var("file", "/usr/lib/libc.so.6").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "${file##*/}")?, ["libc.so.6"]);
    assert_eq!(expand(&mut sh, "${file#*/}")?, ["usr/lib/libc.so.6"]);
    assert_eq!(expand(&mut sh, "${file%.*}")?, ["/usr/lib/libc.so"]);
    assert_eq!(expand(&mut sh, "${file%%.*}")?, ["/usr/lib/libc"]);
    assert_eq!(expand(&mut sh, "${#file}")?, ["18"]);
    Ok(())
}

#[test]
fn test_substring_and_replace() -> Result<(), String> {
    let mut sh = shell();
    sh.set_var("v", "banana").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "${v/an/AN}")?, ["bANana"]);
    assert_eq!(expand(&mut sh, "${v//an/AN}")?, ["bANANa"]);
    assert_eq!(expand(&mut sh, "${v:1:3}")?, ["ana"]);
    assert_eq!(expand(&mut sh, "${v:3}")?, ["ana"]);
    Ok(())
}

#[test]
fn test_pattern_operators_on_long_values() -> Result<(), String> {
    let mut sh = shell();
    let long = format!("{}b{}", "a".repeat(20_000), "c".repeat(3));
    sh.set_var("x", &long).map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "\"${x%%a*b*}\"")?, [""]);
    assert_eq!(expand(&mut sh, "\"${x##*a}\"")?, ["bccc"]);
    assert_eq!(expand(&mut sh, "\"${x#a*b}\"")?, ["ccc"]);
    assert_eq!(expand(&mut sh, "\"${x//a/}\"")?, ["bccc"]);
    assert_eq!(expand(&mut sh, "\"${x/a*b/-}\"")?, ["-ccc"]);
    Ok(())
}

#[test]
fn test_positional_parameters() -> Result<(), String> {
    let mut sh = shell();
    sh.positional = vec!["a b".into(), "c".into()];
    assert_eq!(expand(&mut sh, "\"$@\"")?, ["a b", "c"]);
    assert_eq!(expand(&mut sh, "$@")?, ["a", "b", "c"]);
    assert_eq!(expand(&mut sh, "\"$*\"")?, ["a b c"]);
    assert_eq!(expand(&mut sh, "\"x$@y\"")?, ["xa b", "cy"]);
    assert_eq!(expand(&mut sh, "$# $1")?, ["2", "a", "b"]);

    sh.positional.clear();
    assert!(expand(&mut sh, "\"$@\"")?.is_empty());
    Ok(())
}

#[test]
fn test_special_parameters() -> Result<(), String> {
    let mut sh = shell();
    sh.last_status = 3;
    assert_eq!(expand(&mut sh, "$?")?, ["3"]);
    sh.options.set(Opt::ErrExit, true);
    sh.options.set(Opt::NoUnset, true);
    assert_eq!(expand(&mut sh, "$-")?, ["eu"]);
    let err = expand(&mut sh, "$nope").unwrap_err();
    assert!(err.contains("parameter not set"), "{}", err);
    Ok(())
}

#[test]
fn test_tilde_expansion() -> Result<(), String> {
    let mut sh = shell();
    sh.set_var("HOME", "/home/test").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "~/x")?, ["/home/test/x"]);
    assert_eq!(expand(&mut sh, "'~'/x")?, ["~/x"]);
    Ok(())
}

#[test]
fn test_arithmetic_expansion() -> Result<(), String> {
    let mut sh = shell();
    assert_eq!(expand(&mut sh, "$((1 + 2 * 3))")?, ["7"]);
    assert_eq!(expand(&mut sh, "$((2 ** 10)) $((-7 % 3)) $((1 << 4 | 1))")?, ["1024", "-1", "17"]);
    sh.set_var("x", "1").map_err(|e| e.to_string())?;
    assert_eq!(expand(&mut sh, "$((x += 5))")?, ["6"]);
    assert_eq!(sh.get_var("x").as_deref(), Some("6"));
    assert_eq!(expand(&mut sh, "$((x > 5 ? 10 : 20))")?, ["10"]);
    let err = expand(&mut sh, "$((7 / 0))").unwrap_err();
    assert!(err.contains("division by zero"), "{}", err);
    Ok(())
}

#[test]
fn test_arithmetic_constants() {
    assert_eq!(arith::parse_number("0x1f"), Some(31));
    assert_eq!(arith::parse_number("010"), Some(8));
    assert_eq!(arith::parse_number("2#101"), Some(5));
    assert_eq!(arith::parse_number("12abc"), None);
}

#[test]
fn test_pathname_expansion() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    for name in ["b.txt", "a.txt", "c.log", ".hidden.txt"] {
        fs::write(dir.path().join(name), "").map_err(|e| e.to_string())?;
    }
    let base = dir.path().display().to_string();
    let mut sh = shell();
    assert_eq!(
        expand(&mut sh, &format!("{}/*.txt", base))?,
        [format!("{}/a.txt", base), format!("{}/b.txt", base)]
    );
    assert_eq!(expand(&mut sh, &format!("{}/*.none", base))?, [format!("{}/*.none", base)]);
    assert_eq!(expand(&mut sh, &format!("'{}/*.txt'", base))?, [format!("{}/*.txt", base)]);

    sh.options.set(Opt::NoGlob, true);
    assert_eq!(expand(&mut sh, &format!("{}/*.log", base))?, [format!("{}/*.log", base)]);
    Ok(())
}
