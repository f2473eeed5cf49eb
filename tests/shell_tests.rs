use std::path::Path;
use std::process::{Command, Output};

const MODES: [&str; 2] = ["0", "1"];

fn run_in(dir: Option<&Path>, script: &str, args: &[&str], fork_emulation: &str) -> Result<Output, String> {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ashrs"));
    cmd.arg("-c").arg(script).args(args);
    cmd.env("ASHRS_FORK_EMULATION", fork_emulation);
    cmd.env_remove("ENV");
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    cmd.output().map_err(|e| e.to_string())
}

/// Runs `script` under both process-creation modes and checks that they agree.
fn run(script: &str) -> Result<(String, i32), String> {
    let mut results = Vec::new();
    for mode in MODES {
        let out = run_in(None, script, &[], mode)?;
        results.push((
            String::from_utf8_lossy(&out.stdout).into_owned(),
            out.status.code().unwrap_or(-1),
        ));
    }
    if results[0] != results[1] {
        return Err(format!("modes disagree for {:?}: {:?}", script, results));
    }
    Ok(results.swap_remove(0))
}

fn stdout_of(script: &str) -> Result<String, String> {
    Ok(run(script)?.0)
}

#[test]
fn test_exit_statuses() -> Result<(), String> {
    assert_eq!(stdout_of("false; echo $?; true; echo $?")?, "1\n0\n");
    assert_eq!(run("exit 7")?.1, 7);
    assert_eq!(stdout_of("! true; echo $?")?, "1\n");
    assert_eq!(stdout_of("(exit 4); echo $?")?, "4\n");

    let out = run_in(None, "no_such_command_here", &[], "0")?;
    assert_eq!(out.status.code(), Some(127));
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
    Ok(())
}

#[test]
fn test_syntax_error_status() -> Result<(), String> {
    for mode in MODES {
        let out = run_in(None, "if true; then", &[], mode)?;
        assert_eq!(out.status.code(), Some(2));
        assert!(String::from_utf8_lossy(&out.stderr).contains("Syntax error"));
    }
    Ok(())
}

#[test]
fn test_positional_arguments() -> Result<(), String> {
    let out = run_in(None, "echo $0 $# \"$2\"; shift; echo $1", &["name", "a", "b c"], "0")?;
    assert_eq!(String::from_utf8_lossy(&out.stdout), "name 2 b c\nb c\n");
    Ok(())
}

#[test]
fn test_pipelines() -> Result<(), String> {
    assert_eq!(stdout_of("echo hello | tr a-z A-Z")?, "HELLO\n");
    assert_eq!(stdout_of("printf 'b\\na\\n' | sort | head -n 1")?, "a\n");
    assert_eq!(
        stdout_of("printf '1\\n2\\n' | while read n; do echo \"n=$n\"; done")?,
        "n=1\nn=2\n"
    );
    assert_eq!(stdout_of("false | true; echo $?")?, "0\n");
    assert_eq!(stdout_of("set -o pipefail; false | true; echo $?")?, "1\n");
    Ok(())
}

#[test]
fn test_redirections() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    for mode in MODES {
        let script = "echo a > f; echo b >> f; cat < f; echo err 2>&1 >&2 2>/dev/null | cat; \
                      { echo one; echo two; } > g; wc -l < g";
        let out = run_in(Some(dir.path()), script, &[], mode)?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        let lines: Vec<&str> = stdout.lines().map(str::trim).collect();
        assert_eq!(lines, ["a", "b", "err", "2"]);

        let out = run_in(Some(dir.path()), "set -C; echo x > f", &[], mode)?;
        assert_ne!(out.status.code(), Some(0));
        assert_eq!(std::fs::read_to_string(dir.path().join("f")).map_err(|e| e.to_string())?, "a\nb\n");
    }
    Ok(())
}

#[test]
fn test_here_documents() -> Result<(), String> {
    assert_eq!(stdout_of("x=1\ncat <<EOF\nv=$x\nEOF\n")?, "v=1\n");
    assert_eq!(stdout_of("x=1\ncat <<'EOF'\nv=$x\nEOF\n")?, "v=$x\n");
    assert_eq!(stdout_of("cat <<-EOF\n\tindented\n\tEOF\n")?, "indented\n");
    Ok(())
}

#[test]
fn test_command_substitution() -> Result<(), String> {
    assert_eq!(stdout_of("echo \"$(echo hi; echo there)\"")?, "hi\nthere\n");
    assert_eq!(stdout_of("x=$(printf 'a\\n\\n\\n'); echo \"[$x]\"")?, "[a]\n");
    assert_eq!(stdout_of("echo `echo back`ticks")?, "backticks\n");
    assert_eq!(stdout_of("x=$(exit 3); echo $?")?, "3\n");
    Ok(())
}

#[test]
fn test_functions_and_locals() -> Result<(), String> {
    assert_eq!(
        stdout_of("x=g; f() { local x=l; echo $x; }; f; echo $x")?,
        "l\ng\n"
    );
    assert_eq!(stdout_of("f() { return 3; }; f; echo $?")?, "3\n");
    assert_eq!(stdout_of("f() { echo \"$# $1\"; }; f a b; echo \"$#\"")?, "2 a\n0\n");
    // Functions are visible in subshells and pipeline stages.
    assert_eq!(stdout_of("f() { echo in-$1; }; (f sub); f pipe | cat; echo $(f cs)")?, "in-sub\nin-pipe\nin-cs\n");
    Ok(())
}

#[test]
fn test_subshell_isolation() -> Result<(), String> {
    assert_eq!(stdout_of("x=1; (x=2; echo $x); echo $x")?, "2\n1\n");
    assert_eq!(stdout_of("cd /; (cd /tmp); pwd")?, "/\n");
    Ok(())
}

#[test]
fn test_control_flow() -> Result<(), String> {
    assert_eq!(
        stdout_of("for i in a b c; do [ $i = b ] && continue; echo $i; done")?,
        "a\nc\n"
    );
    assert_eq!(
        stdout_of("i=0; while [ $i -lt 5 ]; do i=$((i+1)); [ $i -eq 3 ] && break; done; echo $i")?,
        "3\n"
    );
    assert_eq!(
        stdout_of("for f in x.rs y.c; do case $f in *.rs) echo rust;; *) echo other;; esac; done")?,
        "rust\nother\n"
    );
    assert_eq!(stdout_of("if false; then echo a; elif true; then echo b; else echo c; fi")?, "b\n");
    Ok(())
}

#[test]
fn test_errexit() -> Result<(), String> {
    assert_eq!(run("set -e; false; echo no")?, (String::new(), 1));
    assert_eq!(stdout_of("set -e; if false; then :; fi; false || echo yes")?, "yes\n");
    assert_eq!(stdout_of("set -e; f() { false; echo after; }; f || echo failed")?, "after\n");
    Ok(())
}

#[test]
fn test_traps() -> Result<(), String> {
    assert_eq!(stdout_of("trap 'echo bye' EXIT; echo hi")?, "hi\nbye\n");
    assert_eq!(run("trap 'echo bye; exit 9' EXIT; exit 1")?, ("bye\n".to_string(), 9));
    assert_eq!(
        stdout_of("trap 'echo got USR1' USR1; kill -USR1 $$; echo done")?,
        "got USR1\ndone\n"
    );
    assert_eq!(stdout_of("trap 'echo x' INT; trap")?, "trap -- 'echo x' INT\n");
    Ok(())
}

#[test]
fn test_background_and_wait() -> Result<(), String> {
    assert_eq!(stdout_of("(exit 5) & wait $!; echo $?")?, "5\n");
    assert_eq!(stdout_of("sleep 0 & sleep 0 & wait; echo $?")?, "0\n");
    assert_eq!(stdout_of("echo out & wait")?, "out\n");
    Ok(())
}

#[test]
fn test_variables_and_environment() -> Result<(), String> {
    assert_eq!(stdout_of("export FOO=bar; env | grep '^FOO='")?, "FOO=bar\n");
    assert_eq!(stdout_of("FOO=once env | grep '^FOO='; echo \"[$FOO]\"")?, "FOO=once\n[]\n");
    let (out, status) = run("readonly R=1; R=2; echo unreachable")?;
    assert_eq!(out, "");
    assert_eq!(status, 2);
    assert_eq!(stdout_of("unset -v HOME; echo \"${HOME-gone}\"")?, "gone\n");
    Ok(())
}

#[test]
fn test_builtin_output() -> Result<(), String> {
    assert_eq!(stdout_of("echo -n a; echo b")?, "ab\n");
    assert_eq!(stdout_of("printf '%s-%d\\n' x 42 y 7")?, "x-42\ny-7\n");
    assert_eq!(stdout_of("type cd")?, "cd is a shell builtin\n");
    assert_eq!(stdout_of("f() { :; }; command -v f; command -v echo")?, "f\necho\n");
    assert_eq!(stdout_of("alias ll='ls -l'; alias ll")?, "alias ll='ls -l'\n");
    assert_eq!(stdout_of("set -- a b; set -- \"$@\" c; echo $#")?, "3\n");
    assert_eq!(
        stdout_of("while getopts ab: o -a -b val rest; do echo $o$OPTARG; done; echo $OPTIND")?,
        "a\nbval\n4\n"
    );
    Ok(())
}

#[test]
fn test_eval_and_dot() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    std::fs::write(dir.path().join("lib.sh"), "greeting=hello\nreturn 4\necho skipped\n").map_err(|e| e.to_string())?;
    for mode in MODES {
        let out = run_in(Some(dir.path()), ". ./lib.sh; echo $? $greeting; eval 'x=5; echo $x'", &[], mode)?;
        assert_eq!(String::from_utf8_lossy(&out.stdout), "4 hello\n5\n");
    }
    Ok(())
}

#[test]
fn test_reexec_children_leave_no_files() -> Result<(), String> {
    let tmp = tempfile::tempdir().map_err(|e| e.to_string())?;
    let out = Command::new(env!("CARGO_BIN_EXE_ashrs"))
        .arg("-c")
        .arg("sleep 5 & kill $!; wait; (true); x=$(echo sub); echo $x | cat")
        .env("ASHRS_FORK_EMULATION", "1")
        .env("TMPDIR", tmp.path())
        .env_remove("ENV")
        .output()
        .map_err(|e| e.to_string())?;
    assert_eq!(String::from_utf8_lossy(&out.stdout), "sub\n");
    let left = std::fs::read_dir(tmp.path()).map_err(|e| e.to_string())?.count();
    assert_eq!(left, 0);
    Ok(())
}

fn stdout_in(dir: &Path, script: &str, mode: &str) -> Result<String, String> {
    let out = run_in(Some(dir), script, &[], mode)?;
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

#[test]
fn test_export_and_readonly_listings_reload() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let listing = "{ export -p; readonly -p; } | grep -E ' T[ABR](=|$)'";
    for mode in MODES {
        let saved = stdout_in(
            dir.path(),
            &format!("export TA='x y' TB; readonly TR=\"it's\"; {} > vars; cat vars", listing),
            mode,
        )?;
        assert_eq!(saved.lines().count(), 3);
        let reloaded = stdout_in(
            dir.path(),
            &format!("eval \"$(cat vars)\"; {}; echo \"$TA|$TR\"; env | grep -c '^TA='", listing),
            mode,
        )?;
        assert_eq!(reloaded, format!("{}x y|it's\n1\n", saved));
    }
    Ok(())
}

#[test]
fn test_sourcing_twice_is_idempotent() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    std::fs::write(dir.path().join("lib.sh"), "LIBV='a b'\nexport LIBE=1\nf() { :; }\n").map_err(|e| e.to_string())?;
    let volatile = "'^(RANDOM|SECONDS|LINENO|_)='";
    let script = format!(
        ". ./lib.sh; set > s1; . ./lib.sh; set > s2; \
         grep -v -E {v} s1 > t1; grep -v -E {v} s2 > t2; cmp -s t1 t2 && echo same; grep -c '^LIBV=' t1",
        v = volatile
    );
    for mode in MODES {
        assert_eq!(stdout_in(dir.path(), &script, mode)?, "same\n1\n");
    }
    Ok(())
}

#[test]
fn test_last_background_pid_is_numeric() -> Result<(), String> {
    assert_eq!(
        stdout_of("sleep 0 & case $! in ''|*[!0-9]*) echo bad;; *) echo num;; esac; wait")?,
        "num\n"
    );
    Ok(())
}

#[test]
fn test_children_leave_parent_tables_alone() -> Result<(), String> {
    assert_eq!(
        stdout_of("alias a='echo x'; (unalias a; alias c='echo y'); alias")?,
        "alias a='echo x'\n"
    );
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let script = "sleep 5 & (kill %1 2>/dev/null; echo sub=$?); jobs > jl; echo jobs=$(wc -l < jl); \
                  kill %1; echo kill=$?; wait";
    for mode in MODES {
        assert_eq!(stdout_in(dir.path(), script, mode)?, "sub=1\njobs=1\nkill=0\n");
    }
    Ok(())
}

#[test]
fn test_builtin_errors_name_the_builtin() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let cases = [
        ("export 1x=2", "export: 1x: bad variable name"),
        ("readonly a=1; unset a", "unset: a: is read only"),
        ("readonly 2y", "readonly: 2y: bad variable name"),
        (". ./missing.sh", ".: cannot open ./missing.sh"),
    ];
    for mode in MODES {
        for (script, message) in cases {
            let out = run_in(Some(dir.path()), script, &[], mode)?;
            let stderr = String::from_utf8_lossy(&out.stderr);
            assert!(stderr.contains(message), "{:?} printed {:?}", script, stderr);
            assert_ne!(out.status.code(), Some(0));
        }
    }
    Ok(())
}

#[test]
fn test_process_limit_builtins() -> Result<(), String> {
    assert_eq!(stdout_of("umask 027; umask; umask -S")?, "0027\nu=rwx,g=rx,o=\n");
    assert_eq!(stdout_of("ulimit -n 64; ulimit -n")?, "64\n");
    assert_eq!(stdout_of("times | wc -l | tr -d ' '")?, "2\n");
    assert_eq!(stdout_of("sleep 2 | { read -t 1 x; echo $?; }")?, "142\n");
    Ok(())
}
