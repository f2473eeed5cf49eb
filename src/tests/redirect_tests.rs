use crate::shell::Shell;

fn shell() -> Shell {
    let mut shell = Shell::new("ashrs");
    shell.init_defaults();
    shell
}

#[test]
fn test_redirect_frames_are_popped() -> Result<(), String> {
    let dir = tempfile::tempdir().map_err(|e| e.to_string())?;
    let out = dir.path().join("f");
    let mut sh = shell();

    let status = sh
        .eval_string(&format!("{{ echo hi >{}; }}", out.display()))
        .map_err(|e| e.to_string())?;
    assert_eq!(status, 0);
    assert_eq!(sh.redirs.depth(), 0);
    assert_eq!(std::fs::read_to_string(&out).map_err(|e| e.to_string())?, "hi\n");

    let script = format!("f() {{ echo in; }} >>{}; f; f", out.display());
    sh.eval_string(&script).map_err(|e| e.to_string())?;
    assert_eq!(sh.redirs.depth(), 0);
    assert_eq!(std::fs::read_to_string(&out).map_err(|e| e.to_string())?, "hi\nin\nin\n");
    Ok(())
}

#[test]
fn test_failed_redirect_leaves_no_frame() {
    let mut sh = shell();
    let missing = "/nonexistent-ashrs-dir/f";
    let _ = sh.eval_string(&format!("{{ echo hi; }} >{}", missing));
    assert_eq!(sh.redirs.depth(), 0);
    let _ = sh.eval_string(&format!("echo hi 2>/dev/null >{}", missing));
    assert_eq!(sh.redirs.depth(), 0);
    assert_ne!(sh.last_status, 0);
}
