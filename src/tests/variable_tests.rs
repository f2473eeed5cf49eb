use crate::options::{scan_options, Opt, Options};
use crate::types::ShellError;
use crate::vars::{Hook, Origin, VarTable};

#[test]
fn test_set_and_export() -> Result<(), String> {
    let mut vars = VarTable::new();
    vars.set("A", "1", false).map_err(|e| e.to_string())?;
    vars.export("B", Some("2")).map_err(|e| e.to_string())?;
    vars.export("C", None).map_err(|e| e.to_string())?;
    assert_eq!(vars.value("A"), Some("1"));
    // Declared but unset variables are not passed on.
    assert_eq!(vars.environ(), vec![("B".to_string(), "2".to_string())]);
    assert!(!vars.is_set("C"));
    vars.unexport("B");
    assert!(vars.environ().is_empty());
    Ok(())
}

#[test]
fn test_readonly() -> Result<(), String> {
    let mut vars = VarTable::new();
    vars.set_readonly("R", Some("fixed")).map_err(|e| e.to_string())?;
    assert!(matches!(vars.set("R", "x", false), Err(ShellError::Readonly(_))));
    assert!(matches!(vars.unset("R"), Err(ShellError::Readonly(_))));
    assert_eq!(vars.value("R"), Some("fixed"));
    assert_eq!(vars.listing("readonly", |v| v.readonly), ["readonly R=fixed"]);
    Ok(())
}

#[test]
fn test_defaults_keep_imported_values() {
    let mut vars = VarTable::new();
    vars.import("PS1", "% ");
    vars.set_default("PS1", "$ ");
    vars.set_default("PS2", "> ");
    assert_eq!(vars.value("PS1"), Some("% "));
    assert_eq!(vars.get("PS1").map(|v| v.origin), Some(Origin::Environment));
    assert_eq!(vars.get("PS2").map(|v| v.origin), Some(Origin::Default));
}

#[test]
fn test_hooks_are_reported() -> Result<(), String> {
    let mut vars = VarTable::new();
    assert_eq!(vars.set("PATH", "/bin", false).map_err(|e| e.to_string())?, Some(Hook::Path));
    assert_eq!(vars.set("OPTIND", "1", false).map_err(|e| e.to_string())?, Some(Hook::OptInd));
    assert_eq!(vars.set("plain", "1", false).map_err(|e| e.to_string())?, None);
    Ok(())
}

#[test]
fn test_local_frames() -> Result<(), String> {
    let mut vars = VarTable::new();
    vars.set("x", "global", false).map_err(|e| e.to_string())?;
    assert!(vars.make_local("x", Some("outside")).is_err());

    vars.push_frame();
    vars.make_local("x", Some("local")).map_err(|e| e.to_string())?;
    vars.make_local("fresh", None).map_err(|e| e.to_string())?;
    vars.save_options("e".into()).map_err(|e| e.to_string())?;
    assert_eq!(vars.value("x"), Some("local"));
    assert!(vars.get("fresh").is_some());

    let (_, letters) = vars.pop_frame();
    assert_eq!(letters.as_deref(), Some("e"));
    assert_eq!(vars.value("x"), Some("global"));
    assert!(vars.get("fresh").is_none());
    assert_eq!(vars.depth(), 0);
    Ok(())
}

#[test]
fn test_local_keeps_current_value() -> Result<(), String> {
    let mut vars = VarTable::new();
    vars.export("x", Some("kept")).map_err(|e| e.to_string())?;
    vars.push_frame();
    vars.make_local("x", None).map_err(|e| e.to_string())?;
    assert_eq!(vars.value("x"), Some("kept"));
    vars.set("x", "changed", false).map_err(|e| e.to_string())?;
    vars.pop_frame();
    assert_eq!(vars.value("x"), Some("kept"));
    assert!(vars.get("x").map_or(false, |v| v.exported));
    Ok(())
}

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_option_scan() -> Result<(), String> {
    let mut opts = Options::default();
    let scan = scan_options(&args(&["-eu", "+e", "-o", "pipefail", "rest"]), &mut opts, "", "set")
        .map_err(|e| e.to_string())?;
    assert_eq!(scan.next, 4);
    assert!(!opts.get(Opt::ErrExit));
    assert!(opts.get(Opt::NoUnset));
    assert!(opts.get(Opt::PipeFail));
    assert_eq!(opts.letters(), "u");

    let scan = scan_options(&args(&["-c", "--", "-x"]), &mut opts, "c", "ashrs").map_err(|e| e.to_string())?;
    assert_eq!(scan.extras, vec![('c', true)]);
    assert!(scan.end_marker);
    assert_eq!(scan.next, 2);
    assert!(!opts.get(Opt::XTrace));

    let scan = scan_options(&args(&["-o"]), &mut opts, "", "set").map_err(|e| e.to_string())?;
    assert_eq!(scan.list, Some(false));
    Ok(())
}

#[test]
fn test_option_errors() {
    let mut opts = Options::default();
    let err = scan_options(&args(&["-Q"]), &mut opts, "", "set").unwrap_err();
    assert_eq!(err.to_string(), "set: Illegal option -Q");
    let err = scan_options(&args(&["-o", "bogus"]), &mut opts, "", "set").unwrap_err();
    assert_eq!(err.to_string(), "set: Illegal option -o bogus");
    // `-i` is only meaningful at invocation.
    assert!(scan_options(&args(&["-i"]), &mut opts, "", "set").is_err());
}

#[test]
fn test_option_listings() {
    let mut opts = Options::default();
    opts.set(Opt::Vi, true);
    opts.set(Opt::Emacs, true);
    assert!(!opts.get(Opt::Vi));
    assert!(opts.listing().contains(&format!("{:<16}on", "emacs")));
    assert!(opts.restore_commands().contains(&"set +o vi".to_string()));
    assert!(!opts.restore_commands().iter().any(|c| c.ends_with("interactive")));

    let mut restored = Options::default();
    opts.set(Opt::AllExport, true);
    restored.restore_letters(&opts.letters());
    assert!(restored.get(Opt::AllExport));
    assert_eq!(Options::from_bits(opts.bits()), opts);
}
