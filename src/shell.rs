//! The interpreter context: everything a running shell knows, plus the
//! read-eval loop and the plumbing shared by the executor and builtins.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::os::unix::io::{FromRawFd, IntoRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::unistd;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::ast::Node;
use crate::executor::EvalFlags;
use crate::history::History;
use crate::jobs::{JobFormat, JobState, JobTable};
use crate::lexer::{FileSource, Lexer, LineSource};
use crate::mail::{MailState, DEFAULT_INTERVAL};
use crate::options::{Opt, Options};
use crate::parser::{Parsed, Parser};
use crate::redir::RedirStack;
use crate::signals::{self, Traps, ERR_TRAP, EXIT_TRAP};
use crate::spawn::SpawnMode;
use crate::sys;
use crate::types::{Exception, ExecuteResult, ShellError};
use crate::utils::is_name;
use crate::vars::{Dynamic, Hook, VarTable};

/// Pending control-flow transfer, checked after every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    None,
    Break(usize),
    Continue(usize),
    Return,
}

const DEFAULT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub struct Shell {
    /// Name used in diagnostics when no script is running.
    pub name: String,
    /// `$0`.
    pub arg0: String,
    pub positional: Vec<String>,
    pub vars: VarTable,
    pub options: Options,
    pub aliases: HashMap<String, String>,
    pub functions: HashMap<String, Rc<Node>>,
    /// Remembered command locations (`hash`).
    pub cmd_cache: HashMap<String, String>,
    pub jobs: JobTable,
    pub traps: Traps,
    pub redirs: RedirStack,
    pub history: Rc<RefCell<History>>,
    /// Command names offered by interactive completion.
    pub completions: Rc<RefCell<Vec<String>>>,
    pub mail: MailState,
    pub last_status: i32,
    pub last_bg_pid: Option<i32>,
    /// `$$`: unchanged in subshells.
    pub shell_pid: i32,
    pub skip: Skip,
    pub loop_depth: usize,
    pub func_depth: usize,
    pub dot_depth: usize,
    pub funcnames: Vec<String>,
    pub lineno: usize,
    pub spawn_mode: SpawnMode,
    pub self_exe: PathBuf,
    pub rng: RefCell<StdRng>,
    /// Epoch second at which `SECONDS` was zero.
    pub seconds_base: i64,
    /// Character position inside the current `getopts` argument.
    pub getopts_pos: usize,
    /// This process is a subshell: it exits rather than returning to a
    /// prompt.
    pub subshell: bool,
    pub in_err_trap: bool,
    /// Commands run by a builtin (`eval`, `.`) have their status tested.
    pub cond_context: bool,
    /// An untrapped SIGINT arrived while waiting for a foreground job.
    pub pending_interrupt: bool,
    /// Status of the last command substitution in the current command.
    pub subst_status: Option<i32>,
    /// Descriptors handed out by process substitution, closed after the
    /// command that uses them.
    pub proc_subst_fds: Vec<RawFd>,
    /// Helper processes not tracked as jobs.
    pub orphans: Vec<i32>,
    /// Controlling terminal when job control is on.
    pub tty_fd: Option<RawFd>,
    pub shell_pgid: i32,
    pub login: bool,
}

impl Shell {
    pub fn new(name: &str) -> Self {
        let pid = unistd::getpid().as_raw();
        Self {
            name: name.to_string(),
            arg0: name.to_string(),
            positional: Vec::new(),
            vars: VarTable::new(),
            options: Options::default(),
            aliases: HashMap::new(),
            functions: HashMap::new(),
            cmd_cache: HashMap::new(),
            jobs: JobTable::new(),
            traps: Traps::new(),
            redirs: RedirStack::new(),
            history: Rc::new(RefCell::new(History::new())),
            completions: Rc::new(RefCell::new(Vec::new())),
            mail: MailState::default(),
            last_status: 0,
            last_bg_pid: None,
            shell_pid: pid,
            skip: Skip::None,
            loop_depth: 0,
            func_depth: 0,
            dot_depth: 0,
            funcnames: Vec::new(),
            lineno: 0,
            spawn_mode: SpawnMode::from_env(),
            self_exe: std::env::current_exe().unwrap_or_else(|_| PathBuf::from("/proc/self/exe")),
            rng: RefCell::new(StdRng::from_entropy()),
            seconds_base: now_secs(),
            getopts_pos: 0,
            subshell: false,
            in_err_trap: false,
            cond_context: false,
            pending_interrupt: false,
            subst_status: None,
            proc_subst_fds: Vec::new(),
            orphans: Vec::new(),
            tty_fd: None,
            shell_pgid: unistd::getpgrp().as_raw(),
            login: false,
        }
    }

    /// Imports the process environment as exported variables.
    pub fn import_environment(&mut self) {
        for (key, value) in std::env::vars_os() {
            let key = key.to_string_lossy();
            if is_name(&key) {
                self.vars.import(&key, &value.to_string_lossy());
            }
        }
        let level = self
            .vars
            .value("SHLVL")
            .and_then(|v| v.trim().parse::<i64>().ok())
            .unwrap_or(0);
        let _ = self.vars.export("SHLVL", Some(&(level + 1).to_string()));
        let _ = self.vars.set("PPID", &unistd::getppid().as_raw().to_string(), false);

        let cwd = std::env::current_dir().ok();
        let pwd_valid = match (self.vars.value("PWD"), &cwd) {
            (Some(pwd), Some(cwd)) => {
                Path::new(pwd).is_absolute()
                    && std::fs::canonicalize(pwd).ok().as_deref() == Some(cwd.as_path())
            }
            _ => false,
        };
        if !pwd_valid {
            if let Some(cwd) = cwd {
                let _ = self.vars.export("PWD", Some(&cwd.to_string_lossy()));
            }
        }
    }

    /// Variables every shell has, without replacing imported values.
    pub fn init_defaults(&mut self) {
        self.vars.set_default("IFS", " \t\n");
        let ps1 = if unistd::geteuid().is_root() { "# " } else { "$ " };
        self.vars.set_default("PS1", ps1);
        self.vars.set_default("PS2", "> ");
        self.vars.set_default("PS4", "+ ");
        self.vars.set_default("PATH", DEFAULT_PATH);
        let _ = self.vars.set("OPTIND", "1", false);
        self.vars.set_dynamic("RANDOM", Dynamic::Random);
        self.vars.set_dynamic("LINENO", Dynamic::LineNo);
        self.vars.set_dynamic("FUNCNAME", Dynamic::FuncName);
        self.vars.set_dynamic("SECONDS", Dynamic::Seconds);
        if self.vars.is_set("HISTSIZE") {
            self.run_hook(Hook::HistSize);
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.options.get(Opt::Interactive) && !self.subshell
    }

    /// Variable value, computing dynamic variables.
    pub fn get_var(&self, name: &str) -> Option<String> {
        let var = self.vars.get(name)?;
        match var.dynamic {
            Some(Dynamic::Random) => Some(self.rng.borrow_mut().gen_range(0..32768).to_string()),
            Some(Dynamic::LineNo) => Some(self.lineno.to_string()),
            Some(Dynamic::FuncName) => self.funcnames.last().cloned(),
            Some(Dynamic::Seconds) => Some((now_secs() - self.seconds_base).to_string()),
            None => var.value.clone(),
        }
    }

    /// Assigns a variable, exporting it under `set -a` and running its hook.
    pub fn set_var(&mut self, name: &str, value: &str) -> Result<(), ShellError> {
        let export = self.options.get(Opt::AllExport);
        if let Some(hook) = self.vars.set(name, value, export)? {
            self.run_hook(hook);
        }
        Ok(())
    }

    pub fn unset_var(&mut self, name: &str) -> Result<(), ShellError> {
        if let Some(hook) = self.vars.unset(name)? {
            self.run_hook(hook);
        }
        Ok(())
    }

    pub fn run_hook(&mut self, hook: Hook) {
        match hook {
            Hook::Path => {
                self.cmd_cache.clear();
                tracing::debug!("command cache cleared");
            }
            Hook::Random => {
                if let Some(seed) = self.vars.value("RANDOM").and_then(|v| v.parse::<u64>().ok()) {
                    *self.rng.borrow_mut() = StdRng::seed_from_u64(seed);
                }
            }
            Hook::OptInd => self.getopts_pos = 0,
            Hook::Mail => self.mail.reset(),
            Hook::HistSize => {
                let max = self
                    .vars
                    .value("HISTSIZE")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(crate::history::DEFAULT_HISTSIZE);
                self.history.borrow_mut().set_max(max);
            }
            Hook::Seconds => {
                if let Some(n) = self.vars.value("SECONDS").and_then(|v| v.parse::<i64>().ok()) {
                    self.seconds_base = now_secs() - n;
                }
            }
        }
    }

    /// Restores variables made local in the innermost function frame.
    pub fn pop_locals(&mut self) {
        let (hooks, letters) = self.vars.pop_frame();
        for hook in hooks {
            self.run_hook(hook);
        }
        if let Some(letters) = letters {
            self.options.restore_letters(&letters);
        }
    }

    /// Turns an option on or off, applying its side effects.
    pub fn set_option(&mut self, opt: Opt, on: bool) {
        self.options.set(opt, on);
        match opt {
            Opt::Monitor | Opt::Interactive => {
                let monitor = self.options.get(Opt::Monitor) && !self.subshell;
                self.traps.set_mode(self.is_interactive(), monitor);
                if monitor && self.tty_fd.is_none() {
                    self.tty_fd = open_tty();
                }
            }
            _ => {}
        }
    }

    /// Prints `err` with the script name and line.
    pub fn report(&self, err: &ShellError) {
        let line = err.line().unwrap_or(self.lineno);
        let msg = match err.origin() {
            Some(origin) => format!("{}: {}: {}: {}", self.arg0, origin, line, err),
            None if !self.is_interactive() && line > 0 => format!("{}: {}: {}", self.arg0, line, err),
            None => format!("{}: {}", self.arg0, err),
        };
        let _ = writeln!(io::stderr(), "{}", msg);
    }

    pub(crate) fn become_subshell(&mut self) {
        self.subshell = true;
        self.jobs = JobTable::new();
        self.options.set(Opt::Monitor, false);
        self.orphans.clear();
        *self.rng.borrow_mut() = StdRng::from_entropy();
    }

    /// Runs and clears the EXIT trap. `exit n` inside it sets the status.
    pub fn run_exit_trap(&mut self) {
        let Some(action) = self.traps.get(EXIT_TRAP).map(str::to_string) else {
            return;
        };
        let _ = self.traps.set(EXIT_TRAP, None);
        let saved = self.last_status;
        self.skip = Skip::None;
        match self.eval_string(&action) {
            Err(Exception::Exit(status)) => self.last_status = status,
            Err(Exception::Error(e)) => {
                self.report(&e);
                self.last_status = saved;
            }
            _ => self.last_status = saved,
        }
    }

    /// Runs the ERR trap after a failing command.
    pub fn run_err_trap(&mut self) -> ExecuteResult<()> {
        if self.in_err_trap {
            return Ok(());
        }
        let Some(action) = self.traps.get(ERR_TRAP).map(str::to_string) else {
            return Ok(());
        };
        self.in_err_trap = true;
        let saved = self.last_status;
        let result = self.eval_string(&action);
        self.in_err_trap = false;
        self.last_status = saved;
        result.map(drop)
    }

    /// Services signals that arrived since the last check. An untrapped
    /// SIGINT in an interactive shell abandons the current command line.
    pub fn run_pending_traps(&mut self) -> ExecuteResult<()> {
        self.service_signals()?;
        if std::mem::take(&mut self.pending_interrupt) {
            return Err(Exception::Interrupt);
        }
        Ok(())
    }

    /// Runs trap actions for pending signals. An untrapped SIGINT is only
    /// recorded, to be raised at the next command boundary. Returns the last
    /// signal whose trap ran.
    pub fn service_signals(&mut self) -> ExecuteResult<Option<i32>> {
        let mut trapped = None;
        if !signals::any_pending() {
            return Ok(trapped);
        }
        for sig in signals::take_pending() {
            match self.traps.get(sig as usize).map(str::to_string) {
                Some(action) if !action.is_empty() => {
                    let saved = self.last_status;
                    let saved_skip = self.skip;
                    self.skip = Skip::None;
                    self.eval_string(&action)?;
                    self.skip = saved_skip;
                    self.last_status = saved;
                    trapped = Some(sig);
                }
                Some(_) => {}
                None if sig == libc::SIGINT && self.is_interactive() => self.pending_interrupt = true,
                None => {}
            }
        }
        Ok(trapped)
    }

    /// Parses and runs `text` in the current shell (`eval`, traps).
    pub fn eval_string(&mut self, text: &str) -> ExecuteResult<i32> {
        let mut parser = Parser::new(Lexer::from_string(text, None, self.lineno.max(1)));
        self.run_parser(&mut parser, false)
    }

    /// Reads and runs commands until end of input. `top` marks the shell's
    /// main input, where an interactive shell reports errors and carries
    /// on.
    pub fn run_parser(&mut self, parser: &mut Parser, top: bool) -> ExecuteResult<i32> {
        let interactive = top && self.is_interactive();
        let mut ran = false;
        loop {
            if interactive {
                if let Err(e) = self.run_pending_traps() {
                    match e {
                        Exception::Interrupt => {}
                        other => return Err(other),
                    }
                }
                self.before_prompt(parser);
            } else {
                self.run_pending_traps()?;
            }
            parser.set_aliases(&self.aliases);
            parser.set_posix(self.options.get(Opt::Posix));
            parser.lexer_mut().verbose = self.options.get(Opt::Verbose);

            let parsed = parser.parse_next();
            if let Some(err) = parser.lexer_mut().take_error() {
                match err.kind() {
                    io::ErrorKind::Interrupted if interactive => {
                        let _ = writeln!(io::stderr());
                        parser.recover();
                        parser.lexer_mut().clear_eof();
                        self.last_status = 128 + libc::SIGINT;
                        continue;
                    }
                    io::ErrorKind::TimedOut => {
                        let _ = writeln!(io::stderr(), "timed out waiting for input: auto-logout");
                        return Err(Exception::Exit(self.last_status));
                    }
                    _ => {
                        tracing::warn!(error = %err, "input error");
                        break;
                    }
                }
            }
            match parsed {
                Ok(Parsed::Eof) => {
                    if interactive && self.options.get(Opt::IgnoreEof) {
                        let _ = writeln!(io::stderr(), "\nUse \"exit\" to leave shell.");
                        parser.lexer_mut().clear_eof();
                        continue;
                    }
                    if interactive {
                        let _ = writeln!(io::stderr());
                    }
                    break;
                }
                Ok(Parsed::Empty) => {}
                Ok(Parsed::Command(node)) => {
                    ran = true;
                    if self.options.get(Opt::NoExec) && !self.is_interactive() {
                        continue;
                    }
                    let flags = EvalFlags {
                        tested: self.cond_context,
                        exit: false,
                    };
                    let result = self.eval(&node, flags);
                    self.reap_orphans();
                    match result {
                        Ok(_) => {}
                        Err(Exception::Error(e)) if interactive => {
                            self.report(&e);
                            self.last_status = e.exit_status();
                        }
                        Err(Exception::Interrupt) if interactive => {
                            let _ = writeln!(io::stderr());
                            self.last_status = 128 + libc::SIGINT;
                        }
                        Err(e) => return Err(e),
                    }
                    if interactive {
                        self.skip = Skip::None;
                    } else if self.skip != Skip::None {
                        break;
                    }
                }
                Err(e) => {
                    if interactive {
                        self.report(&e);
                        self.last_status = e.exit_status();
                        parser.recover();
                        continue;
                    }
                    return Err(e.into());
                }
            }
        }
        if !ran {
            // An empty script or `eval ""` succeeds.
            self.last_status = 0;
        }
        Ok(self.last_status)
    }

    /// Work done before each interactive prompt: job notifications, mail,
    /// prompt strings and completion candidates.
    fn before_prompt(&mut self, parser: &mut Parser) {
        self.reap_jobs();
        self.notify_jobs();

        let interval = self
            .vars
            .value("MAILCHECK")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_INTERVAL);
        let mailpath = self.vars.value("MAILPATH").map(str::to_string);
        let mail = self.vars.value("MAIL").map(str::to_string);
        for message in self.mail.check(mailpath.as_deref(), mail.as_deref(), interval) {
            let _ = writeln!(io::stderr(), "{}", message);
        }

        let ps1 = self.prompt_string("PS1");
        let ps2 = self.prompt_string("PS2");
        let lexer = parser.lexer_mut();
        lexer.set_prompts(&ps1, &ps2);
        let tmout = self
            .vars
            .value("TMOUT")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .map(Duration::from_secs);
        lexer.set_timeout(tmout);
        lexer.set_edit_mode(self.options.get(Opt::Vi));
        self.refresh_completions();
    }

    fn prompt_string(&mut self, name: &str) -> String {
        let raw = self.get_var(name).unwrap_or_default();
        let saved = self.last_status;
        let expanded = self.expand_text(&raw).unwrap_or(raw);
        self.last_status = saved;
        expanded
    }

    fn refresh_completions(&mut self) {
        let mut names: Vec<String> = crate::builtins::names().map(str::to_string).collect();
        names.extend(self.functions.keys().cloned());
        names.extend(self.aliases.keys().cloned());
        names.extend(crate::parser::KEYWORDS.iter().map(|s| s.to_string()));
        let path = self.get_var("PATH").unwrap_or_default();
        names.extend(crate::completion::path_commands(&path));
        names.sort();
        names.dedup();
        *self.completions.borrow_mut() = names;
    }

    /// Collects status changes of background jobs without blocking.
    pub fn reap_jobs(&mut self) {
        use nix::sys::wait::{waitpid, WaitPidFlag};
        loop {
            let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
            match waitpid(None, Some(flags)) {
                Ok(status) => match crate::jobs::ProcStatus::from_wait(status) {
                    Some((pid, st)) => {
                        self.jobs.record(pid, st);
                        self.orphans.retain(|&p| p != pid.as_raw());
                    }
                    None => break,
                },
                Err(nix::errno::Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    /// Reports finished or stopped background jobs (interactive shells).
    pub fn notify_jobs(&mut self) {
        for id in self.jobs.take_changed() {
            let Some(job) = self.jobs.get(id) else { continue };
            if job.state == JobState::Running {
                continue;
            }
            if let Some(line) = self.jobs.line(id, JobFormat::Normal) {
                let _ = writeln!(io::stderr(), "{}", line);
            }
        }
        self.jobs.purge();
    }

    /// Opens a script with its descriptor moved out of the user range.
    pub fn open_script(path: &Path) -> io::Result<File> {
        let file = File::open(path)?;
        let fd = file.into_raw_fd();
        let moved = sys::dup_above(fd, sys::SAVE_FD_BASE).map_err(io::Error::from);
        let _ = sys::close(fd);
        Ok(unsafe { File::from_raw_fd(moved?) })
    }

    /// Runs a script file as the shell's main input.
    pub fn run_file(&mut self, path: &Path) -> ExecuteResult<i32> {
        let file = Shell::open_script(path).map_err(|e| {
            ShellError::Redirect {
                action: "open",
                path: path.display().to_string(),
                reason: crate::utils::io_reason(&e),
            }
        })?;
        let name = path.display().to_string();
        let mut parser = Parser::new(Lexer::new(Box::new(FileSource::new(file)), Some(name)));
        parser.lexer_mut().line = 1;
        self.run_parser(&mut parser, true)
    }

    /// Runs commands from `source` as the shell's main input.
    pub fn run_source(&mut self, source: Box<dyn LineSource>) -> ExecuteResult<i32> {
        let mut parser = Parser::new(Lexer::new(source, None));
        self.run_parser(&mut parser, true)
    }

    /// `.`: runs a file in the current shell. `return` stops it.
    pub fn source_file(&mut self, path: &Path) -> ExecuteResult<i32> {
        let file = Shell::open_script(path).map_err(|e| {
            ShellError::Redirect {
                action: "open",
                path: path.display().to_string(),
                reason: crate::utils::io_reason(&e),
            }
        })?;
        self.source_opened(file, path)
    }

    /// Runs an already opened script in the current shell, as `.` does.
    pub fn source_opened(&mut self, file: File, path: &Path) -> ExecuteResult<i32> {
        let name = path.display().to_string();
        let mut parser = Parser::new(Lexer::new(Box::new(FileSource::new(file)), Some(name)));
        self.dot_depth += 1;
        let result = self.run_parser(&mut parser, false);
        self.dot_depth -= 1;
        if self.skip == Skip::Return {
            self.skip = Skip::None;
        }
        result
    }

    /// Startup files: `/etc/profile` and `~/.profile` for login shells,
    /// then `$ENV` for interactive ones.
    pub fn run_startup_files(&mut self) -> ExecuteResult<()> {
        if self.login {
            self.source_if_exists(Path::new("/etc/profile"))?;
            if let Some(home) = self.get_var("HOME") {
                self.source_if_exists(&Path::new(&home).join(".profile"))?;
            }
        }
        if self.is_interactive() {
            if let Some(env) = self.get_var("ENV") {
                let path = self.expand_text(&env)?;
                if !path.is_empty() {
                    self.source_if_exists(Path::new(&path))?;
                }
            }
        }
        Ok(())
    }

    fn source_if_exists(&mut self, path: &Path) -> ExecuteResult<()> {
        if !path.is_file() {
            return Ok(());
        }
        match self.source_file(path) {
            Ok(_) => Ok(()),
            Err(Exception::Error(e)) => {
                self.report(&e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Loads `HISTFILE` for an interactive shell.
    pub fn load_history(&mut self) {
        if let Some(path) = self.get_var("HISTFILE") {
            if let Err(e) = self.history.borrow_mut().load(Path::new(&path)) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(file = %path, error = %e, "cannot load history");
                }
            }
        }
    }

    /// Leaves the shell: EXIT trap, history, then process exit.
    pub fn exit_shell(&mut self, status: i32) -> ! {
        self.last_status = status;
        self.run_exit_trap();
        if self.options.get(Opt::Interactive) && !self.subshell {
            if let Some(path) = self.get_var("HISTFILE") {
                if let Err(e) = self.history.borrow().save(Path::new(&path)) {
                    tracing::warn!(file = %path, error = %e, "cannot save history");
                }
            }
            for pgid in self.jobs.live_pgids() {
                let _ = nix::sys::signal::killpg(unistd::Pid::from_raw(pgid), nix::sys::signal::Signal::SIGHUP);
            }
        }
        let _ = io::stdout().flush();
        std::process::exit(self.last_status & 0xff)
    }
}

/// A close-on-exec descriptor for the controlling terminal.
fn open_tty() -> Option<RawFd> {
    let fd = sys::open("/dev/tty", OFlag::O_RDWR, Mode::empty()).ok().or_else(|| sys::isatty(0).then_some(0))?;
    let moved = sys::dup_above(fd, sys::SAVE_FD_BASE).ok();
    if fd != 0 {
        let _ = sys::close(fd);
    }
    moved
}
