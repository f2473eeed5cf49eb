//! Creating child processes.
//!
//! Every construct that needs a separate process goes through
//! [`Shell::spawn_continuation`]. With [`SpawnMode::Fork`] the child is a
//! `fork()` of the shell and simply carries on. With
//! [`SpawnMode::Reexec`] the parent encodes a fork-state block
//! ([`crate::snapshot`]), starts a fresh copy of its own binary with
//! `--ashrs-forkstate <fd>`, and that process rebuilds the shell from the
//! block before running the same continuation. The block travels in an
//! unlinked temporary file whose descriptor the child inherits and closes
//! once read.

use std::io::{Seek, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process;

use nix::errno::Errno;
use nix::unistd::{self, ForkResult, Pid};

use crate::ast::Node;
use crate::options::{Opt, Options};
use crate::shell::Shell;
use crate::signals::Traps;
use crate::snapshot::{self, State};
use crate::sys;
use crate::types::{Exception, ShellError, EXIT_NOEXEC, EXIT_NOTFOUND};
use crate::vars::VarTable;

/// Marker argument for a process resuming from a fork-state block.
pub const FORK_STATE_FLAG: &str = "--ashrs-forkstate";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    Fork,
    Reexec,
}

impl SpawnMode {
    /// `ASHRS_FORK_EMULATION=1` selects the re-exec path.
    pub fn from_env() -> Self {
        match std::env::var("ASHRS_FORK_EMULATION") {
            Ok(v) if v == "1" => SpawnMode::Reexec,
            _ => SpawnMode::Fork,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnKind {
    Subshell,
    PipelineStage,
    CommandSubst,
    HereDocWriter,
    ExecExternal,
}

/// What a new process runs, with the payload it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Continuation<'a> {
    Subshell(&'a Node),
    PipelineStage(&'a Node),
    CommandSubst(&'a Node),
    /// Writes the text to standard output and exits.
    HereDocWriter(&'a str),
    ExecExternal {
        path: &'a str,
        argv: &'a [String],
        env: &'a [(String, String)],
    },
}

impl Continuation<'_> {
    pub fn kind(&self) -> SpawnKind {
        match self {
            Continuation::Subshell(_) => SpawnKind::Subshell,
            Continuation::PipelineStage(_) => SpawnKind::PipelineStage,
            Continuation::CommandSubst(_) => SpawnKind::CommandSubst,
            Continuation::HereDocWriter(_) => SpawnKind::HereDocWriter,
            Continuation::ExecExternal { .. } => SpawnKind::ExecExternal,
        }
    }
}

/// Descriptor and process-group arrangements made in the child before it
/// runs its continuation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChildSetup {
    /// `(from, to)`: `to` becomes a copy of `from`.
    pub dups: Vec<(RawFd, RawFd)>,
    /// Closed after the copies are made.
    pub close: Vec<RawFd>,
    /// Process group to join; `Some(0)` starts a new group led by the child.
    pub pgid: Option<i32>,
    /// Take the terminal for the process group.
    pub foreground: bool,
    /// Asynchronous command without job control: ignore SIGINT and SIGQUIT.
    pub background: bool,
}

impl Shell {
    /// Starts a process running `cont` and returns its pid.
    pub fn spawn_continuation(&mut self, cont: Continuation<'_>, setup: &ChildSetup) -> Result<i32, ShellError> {
        let pid = match self.spawn_mode {
            SpawnMode::Fork => self.spawn_fork(cont, setup)?,
            SpawnMode::Reexec => self.spawn_reexec(cont, setup)?,
        };
        if let Some(pgid) = setup.pgid {
            let group = if pgid == 0 { pid } else { pgid };
            // Also done by the child; whichever runs first wins the race.
            let _ = unistd::setpgid(Pid::from_raw(pid), Pid::from_raw(group));
        }
        tracing::debug!(kind = ?cont.kind(), pid, mode = ?self.spawn_mode, "spawned");
        Ok(pid)
    }

    fn spawn_fork(&mut self, cont: Continuation<'_>, setup: &ChildSetup) -> Result<i32, ShellError> {
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Parent { child }) => Ok(child.as_raw()),
            Ok(ForkResult::Child) => {
                self.enter_child(setup);
                let status = self.run_continuation(cont);
                self.exit_child(status)
            }
            Err(e) => Err(ShellError::os("fork", e)),
        }
    }

    fn spawn_reexec(&mut self, cont: Continuation<'_>, setup: &ChildSetup) -> Result<i32, ShellError> {
        let state = self.capture_state();
        let block = snapshot::encode(&state, &cont, setup);
        tracing::debug!(bytes = block.len(), kind = ?cont.kind(), "fork-state block");

        let io_err = |e: std::io::Error| {
            ShellError::os("fork-state block", Errno::from_i32(e.raw_os_error().unwrap_or(libc::EIO)))
        };
        // Never linked into the filesystem; the child reads it by descriptor.
        let mut file = tempfile::tempfile().map_err(io_err)?;
        file.write_all(&block).map_err(io_err)?;
        file.rewind().map_err(io_err)?;
        let fd = sys::dup_inheritable(file.as_raw_fd(), sys::SAVE_FD_BASE)
            .map_err(|e| ShellError::os("fork-state block", e))?;

        let mut cmd = process::Command::new(&self.self_exe);
        cmd.arg0(&self.name).arg(FORK_STATE_FLAG).arg(fd.to_string());
        if let Some(pgid) = setup.pgid {
            cmd.process_group(pgid);
        }
        let spawned = cmd.spawn();
        let _ = sys::close(fd);
        spawned.map(|child| child.id() as i32).map_err(io_err)
    }

    /// Everything a child can observe, for the fork-state block.
    pub fn capture_state(&self) -> State {
        let mut functions: Vec<_> = self
            .functions
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        functions.sort_by(|a, b| a.0.cmp(&b.0));
        let mut aliases: Vec<_> = self
            .aliases
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        aliases.sort();
        let mut cmd_cache: Vec<_> = self
            .cmd_cache
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        cmd_cache.sort();
        State {
            vars: self
                .vars
                .sorted_names()
                .into_iter()
                .filter_map(|n| self.vars.get(n).map(|v| (n.clone(), v.clone())))
                .collect(),
            aliases,
            functions,
            cmd_cache,
            history: self.history.borrow().entries().to_vec(),
            positional: self.positional.clone(),
            arg0: self.arg0.clone(),
            name: self.name.clone(),
            options: self.options.bits(),
            last_status: self.last_status,
            last_bg_pid: self.last_bg_pid,
            shell_pid: self.shell_pid,
            lineno: self.lineno as u32,
            func_depth: self.func_depth as u32,
            loop_depth: self.loop_depth as u32,
            funcnames: self.funcnames.clone(),
            traps: self.traps.iter().map(|(s, a)| (s, a.to_string())).collect(),
            seconds_base: self.seconds_base,
            fork_emulation: self.spawn_mode == SpawnMode::Reexec,
        }
    }

    /// Rebuilds a shell from a decoded block.
    pub fn from_state(state: State) -> Shell {
        let mut shell = Shell::new(&state.name);
        let mut vars = VarTable::new();
        for (name, var) in state.vars {
            vars.insert_raw(name, var);
        }
        shell.vars = vars;
        shell.aliases = state.aliases.into_iter().collect();
        shell.functions = state.functions.into_iter().collect();
        shell.cmd_cache = state.cmd_cache.into_iter().collect();
        shell.history.borrow_mut().restore(state.history);
        shell.positional = state.positional;
        shell.arg0 = state.arg0;
        shell.options = Options::from_bits(state.options);
        shell.last_status = state.last_status;
        shell.last_bg_pid = state.last_bg_pid;
        shell.shell_pid = state.shell_pid;
        shell.lineno = state.lineno as usize;
        shell.func_depth = state.func_depth as usize;
        shell.loop_depth = state.loop_depth as usize;
        shell.funcnames = state.funcnames;
        let mut traps = Traps::new();
        traps.restore(&state.traps);
        traps.mark_owned(shell.options.get(Opt::Interactive), shell.options.get(Opt::Monitor));
        shell.traps = traps;
        shell.seconds_base = state.seconds_base;
        shell.spawn_mode = if state.fork_emulation {
            SpawnMode::Reexec
        } else {
            SpawnMode::Fork
        };
        shell
    }

    /// Turns this process into a subshell: descriptor setup, process
    /// group, and the subshell resets.
    pub(crate) fn enter_child(&mut self, setup: &ChildSetup) {
        if let Some(pgid) = setup.pgid {
            let me = unistd::getpid();
            let group = if pgid == 0 { me } else { Pid::from_raw(pgid) };
            let _ = unistd::setpgid(me, group);
            if setup.foreground {
                if let Some(tty) = self.tty_fd {
                    let _ = sys::tcsetpgrp(tty, group.as_raw());
                }
            }
        }
        for (from, to) in &setup.dups {
            if from != to {
                let _ = sys::dup2(*from, *to);
            }
        }
        for fd in &setup.close {
            if !setup.dups.iter().any(|(_, to)| to == fd) {
                let _ = sys::close(*fd);
            }
        }
        self.traps.reset_for_subshell();
        if setup.background {
            Traps::ignore_for_background();
        }
        self.become_subshell();
    }

    /// Runs the continuation to completion and returns the exit status.
    pub(crate) fn run_continuation(&mut self, cont: Continuation<'_>) -> i32 {
        match cont {
            Continuation::Subshell(node) | Continuation::PipelineStage(node) => self.run_subshell_body(node),
            Continuation::CommandSubst(node) => {
                self.options.set(Opt::ErrExit, false);
                self.run_subshell_body(node)
            }
            Continuation::HereDocWriter(text) => match sys::write_all(1, text.as_bytes()) {
                Ok(()) => 0,
                Err(_) => 1,
            },
            Continuation::ExecExternal { path, argv, env } => self.exec_program(path, argv, env),
        }
    }

    fn run_subshell_body(&mut self, node: &Node) -> i32 {
        let result = self.eval(node, crate::executor::EvalFlags::exiting());
        let status = match result {
            Ok(status) => status,
            Err(Exception::Exit(status)) => status,
            Err(Exception::Error(e)) => {
                self.report(&e);
                e.exit_status()
            }
            Err(Exception::Interrupt) => 128 + libc::SIGINT,
            Err(Exception::EndOfInput) => self.last_status,
        };
        self.last_status = status;
        self.run_exit_trap();
        self.last_status
    }

    /// Leaves a child process without returning to the caller's stack.
    pub(crate) fn exit_child(&mut self, status: i32) -> ! {
        sys::exit_now(status & 0xff)
    }

    /// Replaces the process with `path`. Returns only on failure, with the
    /// exit status after printing the reason.
    pub(crate) fn exec_program(&mut self, path: &str, argv: &[String], env: &[(String, String)]) -> i32 {
        self.redirs.discard_all();
        let errno = sys::execve(path, argv, env);
        let name = argv.first().map_or(path, String::as_str);
        match errno {
            Errno::ENOEXEC => self.run_as_script(path, argv, env),
            Errno::ENOENT => {
                self.report(&ShellError::NotFound(name.to_string()));
                EXIT_NOTFOUND
            }
            Errno::EACCES | Errno::EISDIR => {
                self.report(&ShellError::NotExecutable(name.to_string()));
                EXIT_NOEXEC
            }
            other => {
                self.report(&ShellError::os(name, other));
                EXIT_NOEXEC
            }
        }
    }

    /// A file without a `#!` line is run by a fresh shell in this process.
    fn run_as_script(&mut self, path: &str, argv: &[String], env: &[(String, String)]) -> i32 {
        let mut fresh = Shell::new(&self.name);
        fresh.spawn_mode = self.spawn_mode;
        fresh.self_exe = self.self_exe.clone();
        fresh.tty_fd = None;
        for (k, v) in env {
            fresh.vars.import(k, v);
        }
        fresh.init_defaults();
        fresh.arg0 = path.to_string();
        fresh.positional = argv.iter().skip(1).cloned().collect();
        fresh.shell_pid = unistd::getpid().as_raw();
        match fresh.run_file(Path::new(path)) {
            Ok(status) => status,
            Err(Exception::Exit(status)) => status,
            Err(Exception::Error(e)) => {
                fresh.report(&e);
                e.exit_status()
            }
            Err(_) => fresh.last_status,
        }
    }
}

/// Entry point of a process started with [`FORK_STATE_FLAG`]: rebuild the
/// shell from the block readable on `fd` and run its continuation. A block that
/// cannot be read or fails validation aborts the process.
pub fn resume_from_block(fd: RawFd) -> ! {
    let read = sys::read_to_end(fd);
    let _ = sys::close(fd);
    let block = match read {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(fd, error = %e, "cannot read fork-state block");
            let _ = writeln!(std::io::stderr(), "ashrs: cannot read fork-state block: {}", e);
            process::abort();
        }
    };
    let snap = match snapshot::decode(&block) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "corrupted fork-state block");
            let _ = writeln!(std::io::stderr(), "ashrs: corrupted fork-state block: {}", e);
            process::abort();
        }
    };
    let mut shell = Shell::from_state(snap.state);
    shell.tty_fd = if sys::isatty(0) { Some(0) } else { None };
    shell.enter_child(&snap.setup);
    let status = shell.run_continuation(snap.continuation.as_continuation());
    shell.exit_child(status)
}
