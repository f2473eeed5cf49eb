use std::rc::Rc;

use crate::ast::Node;
use crate::parser::Parser;
use crate::snapshot::{decode, encode, DecodeError, OwnedContinuation, State};
use crate::spawn::{ChildSetup, Continuation};
use crate::vars::{Hook, Origin, Var};

fn parse(input: &str) -> Result<Node, String> {
    Parser::from_string(input, None)
        .parse_program()
        .map_err(|e| e.to_string())
}

fn sample_state() -> Result<State, String> {
    let mut exported = Var::new(Some("/usr/bin:/bin".into()));
    exported.exported = true;
    exported.origin = Origin::Environment;
    exported.hook = Some(Hook::Path);
    let mut declared = Var::new(None);
    declared.readonly = true;
    let body = parse("greet() { echo \"hello ${1:-world}\" >&2; }")?;
    Ok(State {
        vars: vec![("PATH".into(), exported), ("LOCK".into(), declared)],
        aliases: vec![("ll".into(), "ls -l".into())],
        functions: vec![("greet".into(), Rc::new(body))],
        cmd_cache: vec![("ls".into(), "/bin/ls".into())],
        history: vec!["echo one".into()],
        positional: vec!["a b".into(), String::new()],
        arg0: "ashrs".into(),
        name: "script.sh".into(),
        options: 0b1001,
        last_status: 3,
        last_bg_pid: Some(4242),
        shell_pid: 100,
        lineno: 12,
        func_depth: 1,
        loop_depth: 2,
        funcnames: vec!["greet".into()],
        traps: vec![(0, "echo bye".into()), (15, String::new())],
        seconds_base: 1_700_000_000,
        fork_emulation: true,
    })
}

fn sample_block() -> Result<(State, Node, Vec<u8>), String> {
    let state = sample_state()?;
    let node = parse("case $x in a*) for i in 1 2; do echo $i; done;; esac | cat <<EOF\n$HOME\nEOF\n")?;
    let setup = ChildSetup {
        dups: vec![(5, 1)],
        close: vec![4, 5],
        pgid: Some(0),
        foreground: true,
        background: false,
    };
    let block = encode(&state, &Continuation::Subshell(&node), &setup).to_vec();
    Ok((state, node, block))
}

#[test]
fn test_block_restores_state_and_continuation() -> Result<(), String> {
    let (state, node, block) = sample_block()?;
    let snap = decode(&block).map_err(|e| e.to_string())?;
    assert_eq!(snap.state, state);
    assert_eq!(snap.continuation, OwnedContinuation::Subshell(node));
    assert_eq!(snap.setup.dups, vec![(5, 1)]);
    assert_eq!(snap.setup.pgid, Some(0));
    assert!(snap.setup.foreground);
    Ok(())
}

#[test]
fn test_exec_continuation() -> Result<(), String> {
    let argv = vec!["ls".to_string(), "-l".to_string()];
    let env = vec![("HOME".to_string(), "/root".to_string())];
    let cont = Continuation::ExecExternal {
        path: "/bin/ls",
        argv: &argv,
        env: &env,
    };
    let block = encode(&State::default(), &cont, &ChildSetup::default());
    let snap = decode(&block).map_err(|e| e.to_string())?;
    assert_eq!(
        snap.continuation,
        OwnedContinuation::ExecExternal {
            path: "/bin/ls".into(),
            argv,
            env
        }
    );
    assert_eq!(snap.setup.pgid, None);
    Ok(())
}

#[test]
fn test_corrupt_blocks_are_rejected() -> Result<(), String> {
    let (_, _, block) = sample_block()?;

    let mut bad = block.clone();
    bad[0] = b'X';
    assert_eq!(decode(&bad).unwrap_err(), DecodeError::BadMagic);

    let mut bad = block.clone();
    bad[5] = bad[5].wrapping_add(1);
    assert!(matches!(decode(&bad), Err(DecodeError::Version(_))));

    let mut bad = block.clone();
    let last = bad.len() - 1;
    bad[last] ^= 0x40;
    assert_eq!(decode(&bad).unwrap_err(), DecodeError::Checksum);

    assert_eq!(decode(&block[..block.len() - 1]).unwrap_err(), DecodeError::Truncated);
    assert_eq!(decode(&block[..10]).unwrap_err(), DecodeError::Truncated);

    let mut bad = block.clone();
    bad.push(0);
    assert_eq!(decode(&bad).unwrap_err(), DecodeError::Trailing(1));
    Ok(())
}
