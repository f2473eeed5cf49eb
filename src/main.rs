use std::os::unix::io::RawFd;
use std::path::Path;
use std::process::exit;

use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

use ashrs::input::InteractiveSource;
use ashrs::lexer::{FdSource, StringSource};
use ashrs::options::{scan_options, Opt, Options};
use ashrs::shell::Shell;
use ashrs::signals::{self, Disposition};
use ashrs::spawn::{resume_from_block, FORK_STATE_FLAG};
use ashrs::sys;
use ashrs::types::{Exception, EXIT_NOTFOUND};

/// Where the shell reads its commands from.
enum Input {
    Command(String),
    Script(String),
    Stdin,
}

struct Invocation {
    input: Input,
    arg0: String,
    positional: Vec<String>,
    options: Options,
    interactive: bool,
    login: bool,
}

/// `ashrs [-abCefhilmnsuvx] [-o option]... [-c string [name [arg...]] | file [arg...]]`
fn parse_invocation(argv: &[String]) -> Result<Invocation> {
    let name = argv.first().cloned().unwrap_or_else(|| "ashrs".to_string());
    let args = argv.get(1..).unwrap_or_default();

    let mut options = Options::default();
    let scan = scan_options(args, &mut options, "cils", "ashrs")?;
    let has = |c: char| scan.extras.iter().any(|&(letter, on)| letter == c && on);
    let operands = &args[scan.next..];

    let read_stdin = has('s') || (!has('c') && operands.is_empty());
    let interactive = has('i') || (read_stdin && sys::isatty(0) && sys::isatty(2));
    if interactive {
        // Job control defaults on for interactive shells unless `+m` was given.
        options = Options::default();
        options.set(Opt::Monitor, true);
        scan_options(args, &mut options, "cils", "ashrs")?;
    }
    let login = has('l') || name.starts_with('-');

    let (input, arg0, positional) = if has('c') {
        let Some(command) = operands.first() else {
            bail!("ashrs: -c requires an argument");
        };
        let arg0 = operands.get(1).cloned().unwrap_or_else(|| name.clone());
        let positional = operands.iter().skip(2).cloned().collect();
        (Input::Command(command.clone()), arg0, positional)
    } else if read_stdin {
        (Input::Stdin, name.clone(), operands.to_vec())
    } else {
        let script = operands[0].clone();
        (Input::Script(script.clone()), script, operands[1..].to_vec())
    };
    options.set(Opt::Stdin, matches!(input, Input::Stdin));

    Ok(Invocation {
        input,
        arg0,
        positional,
        options,
        interactive,
        login,
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("ASHRS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(argv: Vec<String>) -> Result<()> {
    let invocation = parse_invocation(&argv)?;
    tracing::debug!(interactive = invocation.interactive, login = invocation.login, "starting");

    let mut shell = Shell::new(&invocation.arg0);
    shell.arg0 = invocation.arg0;
    shell.positional = invocation.positional;
    shell.login = invocation.login;
    let monitor = invocation.options.get(Opt::Monitor);
    shell.options = invocation.options;
    shell.options.set(Opt::Monitor, false);
    shell.import_environment();
    shell.init_defaults();
    shell.set_option(Opt::Interactive, invocation.interactive);
    shell.set_option(Opt::Monitor, monitor);

    if let Err(e) = shell.run_startup_files() {
        match e {
            Exception::Exit(status) => shell.exit_shell(status),
            Exception::Error(e) => shell.report(&e),
            _ => {}
        }
    }
    if invocation.interactive {
        shell.load_history();
    }

    let result = match invocation.input {
        Input::Command(command) => shell.run_source(Box::new(StringSource::new(command))),
        Input::Script(script) => {
            if let Err(e) = std::fs::metadata(&script) {
                eprintln!("{}: cannot open {}: {}", shell.name, script, ashrs::utils::io_reason(&e));
                shell.exit_shell(EXIT_NOTFOUND);
            }
            shell.run_file(Path::new(&script))
        }
        Input::Stdin if invocation.interactive => {
            let source = InteractiveSource::new(shell.history.clone(), shell.completions.clone());
            shell.run_source(Box::new(source))
        }
        Input::Stdin => shell.run_source(Box::new(FdSource::new(0))),
    };
    let status = match result {
        Ok(status) | Err(Exception::Exit(status)) => status,
        Err(Exception::Error(e)) => {
            shell.report(&e);
            e.exit_status()
        }
        Err(Exception::Interrupt) => 128 + libc::SIGINT,
        Err(Exception::EndOfInput) => shell.last_status,
    };
    shell.exit_shell(status)
}

fn main() {
    // The Rust runtime ignores SIGPIPE; commands we start expect the default.
    signals::set_disposition(libc::SIGPIPE, Disposition::Default);
    init_tracing();

    let argv: Vec<String> = std::env::args_os().map(|a| a.to_string_lossy().into_owned()).collect();
    if argv.get(1).map(String::as_str) == Some(FORK_STATE_FLAG) {
        let Some(fd) = argv.get(2).and_then(|a| a.parse::<RawFd>().ok()) else {
            eprintln!("ashrs: {} requires a descriptor", FORK_STATE_FLAG);
            exit(2);
        };
        resume_from_block(fd);
    }

    if let Err(e) = run(argv) {
        eprintln!("{:#}", e);
        exit(2);
    }
}
