//! Evaluation of parsed commands: control flow, simple commands, pipelines
//! and the foreground wait.

use std::rc::Rc;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::ast::{BinaryKind, Case, Command, For, If, Node, Pipeline, Redir};
use crate::builtins::{self, Builtin};
use crate::jobs::{describe_signal, JobFormat, JobState, Proc, ProcStatus};
use crate::options::Opt;
use crate::pattern::Pattern;
use crate::redir::Scope;
use crate::shell::{Shell, Skip};
use crate::signals::EXIT_TRAP;
use crate::spawn::{ChildSetup, Continuation};
use crate::sys;
use crate::types::{Exception, ExecuteResult, ShellError, EXIT_NOTFOUND};
use crate::utils::{is_executable, search_cmd, shell_quote, Lookup};
use crate::word::Word;

/// Deepest allowed nesting of function calls.
const MAX_FUNC_DEPTH: usize = 400;

/// Context passed down while evaluating a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvalFlags {
    /// The status is being tested: `set -e` and the ERR trap do not apply.
    pub tested: bool,
    /// The process exits after this node, so a final external command may
    /// replace it instead of being spawned.
    pub exit: bool,
}

impl EvalFlags {
    pub fn exiting() -> Self {
        Self {
            tested: false,
            exit: true,
        }
    }

    fn tested(self) -> Self {
        Self {
            tested: true,
            exit: false,
        }
    }

    fn continuing(self) -> Self {
        Self { exit: false, ..self }
    }
}

/// What a loop does after its body or condition ran.
enum Flow {
    Next,
    Continue,
    Break,
}

/// What a command name resolved to.
#[derive(Clone)]
pub(crate) enum Target {
    Builtin(&'static Builtin),
    Function(Rc<Node>),
    External(String),
    Missing(ShellError),
}

fn is_redirect_error(e: &ShellError) -> bool {
    matches!(
        e,
        ShellError::Redirect { .. } | ShellError::BadFd(_) | ShellError::Os { .. }
    )
}

fn is_double_bracket(cmd: &Command) -> bool {
    cmd.assigns.is_empty()
        && cmd.args.len() >= 2
        && cmd.args[0].as_literal() == Some("[[")
        && cmd.args.last().and_then(Word::as_literal) == Some("]]")
}

impl Shell {
    pub fn eval(&mut self, node: &Node, flags: EvalFlags) -> ExecuteResult<i32> {
        if crate::signals::any_pending() || self.pending_interrupt {
            self.run_pending_traps()?;
        }
        let status = match node {
            Node::Command(cmd) => {
                let status = self.eval_command(cmd, flags)?;
                self.check_failure(status, flags)?;
                status
            }
            Node::Pipe(p) => {
                let status = self.eval_pipeline(p)?;
                if !p.background {
                    self.check_failure(status, flags)?;
                }
                status
            }
            Node::Redirect(inner, redirs) => self.eval_redirected(inner, redirs, flags)?,
            Node::Background(inner) => self.eval_background(inner)?,
            Node::Subshell(inner) => {
                let status = self.eval_subshell(inner)?;
                self.check_failure(status, flags)?;
                status
            }
            Node::Binary(kind, left, right) => self.eval_binary(*kind, left, right, flags)?,
            Node::If(i) => self.eval_if(i, flags)?,
            Node::For(f) => self.eval_for(f, flags)?,
            Node::Case(c) => self.eval_case(c, flags)?,
            Node::FunctionDef(def) => {
                self.functions.insert(def.name.clone(), def.body.clone());
                0
            }
            Node::Not(inner) => {
                let status = self.eval(inner, flags.tested())?;
                if status == 0 {
                    1
                } else {
                    0
                }
            }
        };
        self.last_status = status;
        Ok(status)
    }

    /// `set -e` and the ERR trap, applied to a failed command whose status
    /// is not being tested.
    fn check_failure(&mut self, status: i32, flags: EvalFlags) -> ExecuteResult<()> {
        if status == 0 || flags.tested || self.skip != Skip::None {
            return Ok(());
        }
        self.last_status = status;
        self.run_err_trap()?;
        if self.options.get(Opt::ErrExit) {
            return Err(Exception::Exit(status));
        }
        Ok(())
    }

    fn eval_binary(&mut self, kind: BinaryKind, left: &Node, right: &Node, flags: EvalFlags) -> ExecuteResult<i32> {
        match kind {
            BinaryKind::And | BinaryKind::Or => {
                let status = self.eval(left, flags.tested())?;
                if self.skip != Skip::None {
                    return Ok(status);
                }
                if (status == 0) == (kind == BinaryKind::And) {
                    self.eval(right, flags)
                } else {
                    Ok(status)
                }
            }
            BinaryKind::Semicolon => {
                let status = self.eval(left, flags.continuing())?;
                if self.skip != Skip::None {
                    return Ok(status);
                }
                self.eval(right, flags)
            }
            BinaryKind::While | BinaryKind::Until => {
                self.loop_depth += 1;
                let result = self.run_loop(kind == BinaryKind::While, left, right, flags.continuing());
                self.loop_depth -= 1;
                result
            }
        }
    }

    /// Consumes one level of a pending `break` or `continue`.
    fn loop_flow(&mut self) -> Flow {
        match self.skip {
            Skip::None => Flow::Next,
            Skip::Break(n) => {
                self.skip = if n > 1 { Skip::Break(n - 1) } else { Skip::None };
                Flow::Break
            }
            Skip::Continue(n) if n > 1 => {
                self.skip = Skip::Continue(n - 1);
                Flow::Break
            }
            Skip::Continue(_) => {
                self.skip = Skip::None;
                Flow::Continue
            }
            Skip::Return => Flow::Break,
        }
    }

    fn run_loop(&mut self, is_while: bool, cond: &Node, body: &Node, flags: EvalFlags) -> ExecuteResult<i32> {
        let mut status = 0;
        loop {
            let test = self.eval(cond, flags.tested())?;
            match self.loop_flow() {
                Flow::Break => break,
                Flow::Continue => continue,
                Flow::Next => {}
            }
            if (test == 0) != is_while {
                break;
            }
            status = self.eval(body, flags)?;
            if let Flow::Break = self.loop_flow() {
                break;
            }
        }
        Ok(status)
    }

    fn eval_if(&mut self, i: &If, flags: EvalFlags) -> ExecuteResult<i32> {
        let test = self.eval(&i.test, flags.tested())?;
        if self.skip != Skip::None {
            return Ok(test);
        }
        if test == 0 {
            self.eval(&i.then, flags)
        } else if let Some(otherwise) = &i.otherwise {
            self.eval(otherwise, flags)
        } else {
            Ok(0)
        }
    }

    fn eval_for(&mut self, f: &For, flags: EvalFlags) -> ExecuteResult<i32> {
        self.lineno = f.line;
        let items = match &f.words {
            Some(words) => self.expand_args(words)?,
            None => self.positional.clone(),
        };
        self.loop_depth += 1;
        let result = self.run_for(f, items, flags.continuing());
        self.loop_depth -= 1;
        result
    }

    fn run_for(&mut self, f: &For, items: Vec<String>, flags: EvalFlags) -> ExecuteResult<i32> {
        let mut status = 0;
        for item in items {
            self.set_var(&f.var, &item)?;
            status = self.eval(&f.body, flags)?;
            if let Flow::Break = self.loop_flow() {
                break;
            }
        }
        Ok(status)
    }

    fn eval_case(&mut self, c: &Case, flags: EvalFlags) -> ExecuteResult<i32> {
        self.lineno = c.line;
        let subject = self.expand_word(&c.subject)?;
        for clause in &c.clauses {
            for pat in &clause.patterns {
                let pattern = self.expand_pattern(pat)?;
                if Pattern::new(&pattern).matches(&subject) {
                    return match &clause.body {
                        Some(body) => self.eval(body, flags),
                        None => Ok(0),
                    };
                }
            }
        }
        Ok(0)
    }

    /// A compound command with redirections.
    fn eval_redirected(&mut self, inner: &Node, redirs: &[Redir], flags: EvalFlags) -> ExecuteResult<i32> {
        let depth = self.redirs.depth();
        let result = match self.apply_redirs(redirs, Scope::Restore) {
            Ok(()) => self.eval(inner, flags),
            Err(e) => self
                .redirect_failed(e)
                .and_then(|status| self.check_failure(status, flags).map(|_| status)),
        };
        self.redirs.unwind_to(depth);
        result
    }

    /// Reports a redirection that could not be made; other errors pass on.
    fn redirect_failed(&mut self, e: Exception) -> ExecuteResult<i32> {
        match e {
            Exception::Error(err) if is_redirect_error(&err) => {
                self.report(&err);
                Ok(err.exit_status())
            }
            other => Err(other),
        }
    }

    pub(crate) fn job_control(&self) -> bool {
        self.options.get(Opt::Monitor) && !self.subshell
    }

    /// Gives the terminal to a foreground process group.
    fn give_terminal(&self, pgid: i32) {
        if let Some(tty) = self.tty_fd {
            let _ = sys::tcsetpgrp(tty, pgid);
        }
    }

    fn reclaim_terminal(&self) {
        if self.job_control() {
            self.give_terminal(self.shell_pgid);
        }
    }

    /// Standard input for an asynchronous command without job control.
    fn background_stdin(setup: &mut ChildSetup) -> Option<i32> {
        let null = sys::open("/dev/null", OFlag::O_RDONLY, Mode::empty()).ok()?;
        setup.dups.push((null, 0));
        setup.close.push(null);
        Some(null)
    }

    fn eval_background(&mut self, inner: &Node) -> ExecuteResult<i32> {
        let job_control = self.job_control();
        let mut setup = ChildSetup {
            pgid: job_control.then_some(0),
            background: !job_control,
            ..ChildSetup::default()
        };
        let null = if job_control {
            None
        } else {
            Shell::background_stdin(&mut setup)
        };
        let spawned = self.spawn_continuation(Continuation::Subshell(inner), &setup);
        if let Some(fd) = null {
            let _ = sys::close(fd);
        }
        let pid = spawned?;
        let procs = vec![Proc {
            pid,
            status: ProcStatus::Running,
            cmd: inner.to_string(),
        }];
        let id = self.jobs.add(pid, procs, job_control);
        self.last_bg_pid = Some(pid);
        if self.is_interactive() {
            let _ = sys::write_all(2, format!("[{}] {}\n", id, pid).as_bytes());
        }
        Ok(0)
    }

    fn eval_subshell(&mut self, inner: &Node) -> ExecuteResult<i32> {
        let job_control = self.job_control();
        let setup = ChildSetup {
            pgid: job_control.then_some(0),
            foreground: job_control,
            ..ChildSetup::default()
        };
        let pid = self.spawn_continuation(Continuation::Subshell(inner), &setup)?;
        if job_control {
            self.give_terminal(pid);
        }
        let procs = vec![Proc {
            pid,
            status: ProcStatus::Running,
            cmd: format!("({})", inner),
        }];
        let id = self.jobs.add(pid, procs, job_control);
        self.wait_foreground(id)
    }

    fn eval_pipeline(&mut self, p: &Pipeline) -> ExecuteResult<i32> {
        let job_control = self.job_control();
        let count = p.commands.len();
        let mut procs: Vec<Proc> = Vec::with_capacity(count);
        let mut pgid = 0;
        let mut prev_read: Option<i32> = None;
        for (i, stage) in p.commands.iter().enumerate() {
            let (read_end, write_end) = if i + 1 < count {
                match sys::pipe() {
                    Ok((r, w)) => (Some(r), Some(w)),
                    Err(e) => {
                        if let Some(r) = prev_read {
                            let _ = sys::close(r);
                        }
                        return Err(ShellError::os("pipe", e).into());
                    }
                }
            } else {
                (None, None)
            };
            let mut setup = ChildSetup {
                pgid: job_control.then_some(pgid),
                foreground: job_control && !p.background,
                background: p.background && !job_control,
                ..ChildSetup::default()
            };
            let mut null = None;
            match prev_read {
                Some(r) => {
                    setup.dups.push((r, 0));
                    setup.close.push(r);
                }
                None if p.background && !job_control => null = Shell::background_stdin(&mut setup),
                None => {}
            }
            if let Some(w) = write_end {
                setup.dups.push((w, 1));
                setup.close.push(w);
            }
            if let Some(r) = read_end {
                setup.close.push(r);
            }
            let spawned = self.spawn_continuation(Continuation::PipelineStage(stage), &setup);
            for fd in [prev_read, write_end, null].into_iter().flatten() {
                let _ = sys::close(fd);
            }
            let pid = match spawned {
                Ok(pid) => pid,
                Err(e) => {
                    if let Some(r) = read_end {
                        let _ = sys::close(r);
                    }
                    return Err(e.into());
                }
            };
            if pgid == 0 {
                pgid = pid;
                if job_control && !p.background {
                    self.give_terminal(pgid);
                }
            }
            procs.push(Proc {
                pid,
                status: ProcStatus::Running,
                cmd: stage.to_string(),
            });
            prev_read = read_end;
        }
        let last_pid = procs.last().map_or(0, |p| p.pid);
        let id = self.jobs.add(pgid, procs, job_control);
        if p.background {
            self.last_bg_pid = Some(last_pid);
            if self.is_interactive() {
                let _ = sys::write_all(2, format!("[{}] {}\n", id, last_pid).as_bytes());
            }
            return Ok(0);
        }
        self.wait_foreground(id)
    }

    /// Waits until job `id` finishes or stops and returns its status.
    /// Trap actions for signals that arrive meanwhile run between waits.
    pub(crate) fn wait_foreground(&mut self, id: usize) -> ExecuteResult<i32> {
        loop {
            let Some(job) = self.jobs.get(id) else { break };
            if job.state != JobState::Running {
                break;
            }
            let Some(pid) = job
                .procs
                .iter()
                .find(|p| p.status == ProcStatus::Running)
                .map(|p| p.pid)
            else {
                break;
            };
            match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WUNTRACED)) {
                Ok(ws) => {
                    if let Some((p, st)) = ProcStatus::from_wait(ws) {
                        self.jobs.record(p, st);
                    }
                }
                Err(Errno::EINTR) => {
                    if let Err(e) = self.service_signals() {
                        self.reclaim_terminal();
                        return Err(e);
                    }
                }
                Err(e) => {
                    tracing::warn!(pid, error = %e, "wait failed");
                    self.jobs.record(Pid::from_raw(pid), ProcStatus::Exited(EXIT_NOTFOUND));
                }
            }
        }
        self.reclaim_terminal();

        let pipefail = self.options.get(Opt::PipeFail);
        let interactive = self.is_interactive();
        let Some(job) = self.jobs.get_mut(id) else {
            return Ok(self.last_status);
        };
        let status = job.status(pipefail);
        if job.state == JobState::Stopped {
            job.changed = false;
            self.jobs.make_current(id);
            if let Some(line) = self.jobs.line(id, JobFormat::Normal) {
                let _ = sys::write_all(2, format!("\n{}\n", line).as_bytes());
            }
            return Ok(status);
        }
        if let Some(ProcStatus::Signaled { signal, core }) = job.procs.last().map(|p| p.status) {
            if signal == libc::SIGINT {
                if interactive {
                    let _ = sys::write_all(2, b"\n");
                }
            } else if signal != libc::SIGPIPE {
                let mut text = describe_signal(signal);
                if core {
                    text.push_str(" (core dumped)");
                }
                text.push('\n');
                let _ = sys::write_all(2, text.as_bytes());
            }
        }
        self.jobs.remove(id);
        Ok(status)
    }

    /// Waits for a process outside the job table.
    pub(crate) fn wait_pid(&mut self, pid: i32) -> i32 {
        loop {
            match waitpid(Pid::from_raw(pid), None) {
                Ok(ws) => match ProcStatus::from_wait(ws) {
                    Some((_, st)) if st.is_done() => return st.exit_code(),
                    _ => continue,
                },
                Err(Errno::EINTR) => continue,
                Err(_) => return EXIT_NOTFOUND,
            }
        }
    }

    /// Collects helper processes that have finished.
    pub(crate) fn reap_orphans(&mut self) {
        self.orphans
            .retain(|&pid| match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) | Err(Errno::EINTR) => true,
                Ok(ws) => !ProcStatus::from_wait(ws).map_or(false, |(_, st)| st.is_done()),
                Err(_) => false,
            });
    }

    fn close_proc_subst(&mut self) {
        for fd in self.proc_subst_fds.drain(..) {
            let _ = sys::close(fd);
        }
        self.reap_orphans();
    }

    /// `$(...)` and backquotes: the output of `node` run in a child.
    pub fn command_subst(&mut self, node: &Node) -> ExecuteResult<String> {
        let (read_end, write_end) = sys::pipe().map_err(|e| ShellError::os("pipe", e))?;
        let setup = ChildSetup {
            dups: vec![(write_end, 1)],
            close: vec![read_end, write_end],
            ..ChildSetup::default()
        };
        let spawned = self.spawn_continuation(Continuation::CommandSubst(node), &setup);
        let _ = sys::close(write_end);
        let pid = match spawned {
            Ok(pid) => pid,
            Err(e) => {
                let _ = sys::close(read_end);
                return Err(e.into());
            }
        };
        let output = sys::read_to_end(read_end);
        let _ = sys::close(read_end);
        let status = self.wait_pid(pid);
        self.subst_status = Some(status);
        let output = output.map_err(|e| ShellError::os("command substitution", e))?;
        Ok(String::from_utf8_lossy(&output).into_owned())
    }

    /// `<(list)` / `>(list)`: runs `body` connected to a pipe and returns
    /// a `/dev/fd` path for the other end.
    pub fn process_subst(&mut self, output: bool, body: &Node) -> ExecuteResult<String> {
        let (read_end, write_end) = sys::pipe().map_err(|e| ShellError::os("pipe", e))?;
        let (child_end, keep, target) = if output {
            (read_end, write_end, 0)
        } else {
            (write_end, read_end, 1)
        };
        let setup = ChildSetup {
            dups: vec![(child_end, target)],
            close: vec![read_end, write_end],
            ..ChildSetup::default()
        };
        let spawned = self.spawn_continuation(Continuation::Subshell(body), &setup);
        let _ = sys::close(child_end);
        let pid = match spawned {
            Ok(pid) => pid,
            Err(e) => {
                let _ = sys::close(keep);
                return Err(e.into());
            }
        };
        self.orphans.push(pid);
        let fd = sys::dup_inheritable(keep, sys::SAVE_FD_BASE);
        let _ = sys::close(keep);
        let fd = fd.map_err(|e| ShellError::os("process substitution", e))?;
        self.proc_subst_fds.push(fd);
        Ok(format!("/dev/fd/{}", fd))
    }

    fn eval_command(&mut self, cmd: &Command, flags: EvalFlags) -> ExecuteResult<i32> {
        if cmd.line > 0 {
            self.lineno = cmd.line;
        }
        if is_double_bracket(cmd) && !self.options.get(Opt::Posix) {
            let words = &cmd.args[1..cmd.args.len() - 1];
            let depth = self.redirs.depth();
            let result = match self.apply_redirs(&cmd.redirs, Scope::Restore) {
                Ok(()) => builtins::test::double_bracket(self, words),
                Err(e) => self.redirect_failed(e),
            };
            self.redirs.unwind_to(depth);
            return result;
        }
        self.subst_status = None;
        let result = match self.expand_command_words(&cmd.args) {
            Ok(argv) => self.run_simple(cmd, argv, flags),
            Err(e) => Err(e),
        };
        self.close_proc_subst();
        result
    }

    /// Expands command words. Arguments of `export`, `readonly` and `local`
    /// that look like assignments are expanded as assignments: no field
    /// splitting or pathname expansion.
    fn expand_command_words(&mut self, words: &[Word]) -> ExecuteResult<Vec<String>> {
        let mut argv: Vec<String> = Vec::with_capacity(words.len());
        let mut declaration = false;
        for word in words {
            if declaration {
                if let Some((name, value)) = word.split_assignment() {
                    let value = self.expand_assign(&value)?;
                    argv.push(format!("{}={}", name, value));
                    continue;
                }
            }
            argv.extend(self.expand_args(std::slice::from_ref(word))?);
            declaration = matches!(
                argv.first().map(String::as_str),
                Some("export" | "readonly" | "local")
            );
        }
        Ok(argv)
    }

    fn expand_assignments(&mut self, assigns: &[Word]) -> ExecuteResult<Vec<(String, String)>> {
        let mut out = Vec::with_capacity(assigns.len());
        for word in assigns {
            let Some((name, value)) = word.split_assignment() else {
                continue;
            };
            let value = self.expand_assign(&value)?;
            out.push((name, value));
        }
        Ok(out)
    }

    /// `set -x` output: the command as it will run, after `PS4`.
    fn trace(&mut self, assigns: &[(String, String)], argv: &[String]) {
        let ps4 = self.get_var("PS4").unwrap_or_default();
        let saved = self.last_status;
        let mut line = self.expand_text(&ps4).unwrap_or(ps4);
        self.last_status = saved;
        let words: Vec<String> = assigns
            .iter()
            .map(|(n, v)| format!("{}={}", n, shell_quote(v)))
            .chain(argv.iter().map(|a| shell_quote(a)))
            .collect();
        line.push_str(&words.join(" "));
        line.push('\n');
        let _ = sys::write_all(2, line.as_bytes());
    }

    fn run_simple(&mut self, cmd: &Command, argv: Vec<String>, flags: EvalFlags) -> ExecuteResult<i32> {
        if argv.is_empty() {
            let assigns = self.expand_assignments(&cmd.assigns)?;
            if self.options.get(Opt::XTrace) && !assigns.is_empty() {
                self.trace(&assigns, &[]);
            }
            for (name, value) in &assigns {
                self.set_var(name, value)?;
            }
            let status = self.subst_status.unwrap_or(0);
            if cmd.redirs.is_empty() {
                return Ok(status);
            }
            let depth = self.redirs.depth();
            let applied = self.apply_redirs(&cmd.redirs, Scope::Restore);
            self.redirs.unwind_to(depth);
            return match applied {
                Ok(()) => Ok(status),
                Err(e) => self.redirect_failed(e),
            };
        }

        let target = self.resolve(&argv[0], true);
        let assigns = self.expand_assignments(&cmd.assigns)?;
        if self.options.get(Opt::XTrace) {
            self.trace(&assigns, &argv);
        }
        let special = matches!(target, Target::Builtin(b) if b.special);
        let scope = if special && argv.len() == 1 && argv[0] == "exec" {
            Scope::Permanent
        } else {
            Scope::Restore
        };
        let depth = self.redirs.depth();
        if let Err(e) = self.apply_redirs(&cmd.redirs, scope) {
            self.redirs.unwind_to(depth);
            if special && !self.is_interactive() {
                return Err(e);
            }
            return self.redirect_failed(e);
        }
        let result = self.run_target(target, &argv, &assigns, flags);
        self.redirs.unwind_to(depth);
        result
    }

    fn run_target(
        &mut self,
        target: Target,
        argv: &[String],
        assigns: &[(String, String)],
        flags: EvalFlags,
    ) -> ExecuteResult<i32> {
        match target {
            Target::Builtin(b) if b.special => {
                for (name, value) in assigns {
                    self.set_var(name, value)?;
                }
                self.run_builtin(b, argv, flags)
            }
            Target::Builtin(b) => self.with_temp_vars(assigns, |sh| sh.run_builtin(b, argv, flags)),
            Target::Function(body) => {
                self.with_temp_vars(assigns, |sh| sh.call_function(&argv[0], body, argv, flags))
            }
            Target::External(path) => self.run_external(&path, argv, assigns, flags),
            Target::Missing(e) => {
                self.report(&e);
                Ok(e.exit_status())
            }
        }
    }

    /// Prefix assignments visible, and exported, only while `f` runs.
    fn with_temp_vars(
        &mut self,
        assigns: &[(String, String)],
        f: impl FnOnce(&mut Shell) -> ExecuteResult<i32>,
    ) -> ExecuteResult<i32> {
        if assigns.is_empty() {
            return f(self);
        }
        self.vars.push_frame();
        let mut result = Ok(0);
        for (name, value) in assigns {
            match self.vars.make_local(name, Some(value)) {
                Ok(hook) => {
                    let _ = self.vars.export(name, None);
                    if let Some(hook) = hook {
                        self.run_hook(hook);
                    }
                }
                Err(e) => {
                    result = Err(e.into());
                    break;
                }
            }
        }
        if result.is_ok() {
            result = f(self);
        }
        self.pop_locals();
        result
    }

    pub(crate) fn run_builtin(&mut self, b: &Builtin, argv: &[String], flags: EvalFlags) -> ExecuteResult<i32> {
        let saved = std::mem::replace(&mut self.cond_context, flags.tested);
        let result = (b.func)(self, argv);
        self.cond_context = saved;
        match result {
            Err(Exception::Error(e)) if !(b.special && !self.is_interactive()) => {
                self.report(&e);
                Ok(e.exit_status())
            }
            other => other,
        }
    }

    pub(crate) fn call_function(
        &mut self,
        name: &str,
        body: Rc<Node>,
        argv: &[String],
        flags: EvalFlags,
    ) -> ExecuteResult<i32> {
        if self.func_depth >= MAX_FUNC_DEPTH {
            return Err(ShellError::builtin(name, "function nesting too deep").into());
        }
        let positional = std::mem::replace(&mut self.positional, argv[1..].to_vec());
        let loop_depth = std::mem::replace(&mut self.loop_depth, 0);
        let redir_depth = self.redirs.depth();
        self.vars.push_frame();
        self.func_depth += 1;
        self.funcnames.push(name.to_string());

        let result = self.eval(
            &body,
            EvalFlags {
                tested: flags.tested,
                exit: false,
            },
        );

        self.funcnames.pop();
        self.func_depth -= 1;
        self.pop_locals();
        self.redirs.unwind_to(redir_depth);
        self.loop_depth = loop_depth;
        self.positional = positional;
        // `return` ends here; `break` and `continue` never leave a function.
        self.skip = Skip::None;
        result.map(|_| self.last_status)
    }

    pub(crate) fn run_external(
        &mut self,
        path: &str,
        argv: &[String],
        assigns: &[(String, String)],
        flags: EvalFlags,
    ) -> ExecuteResult<i32> {
        for (name, _) in assigns {
            if self.vars.get(name).map_or(false, |v| v.readonly) {
                return Err(ShellError::Readonly(name.clone()).into());
            }
        }
        let mut env = self.vars.environ();
        for (name, value) in assigns {
            env.retain(|(k, _)| k != name);
            env.push((name.clone(), value.clone()));
        }
        if flags.exit && self.traps.get(EXIT_TRAP).is_none() {
            return Ok(self.exec_program(path, argv, &env));
        }
        let job_control = self.job_control();
        let setup = ChildSetup {
            pgid: job_control.then_some(0),
            foreground: job_control,
            ..ChildSetup::default()
        };
        let pid = self.spawn_continuation(Continuation::ExecExternal { path, argv, env: &env }, &setup)?;
        if job_control {
            self.give_terminal(pid);
        }
        let procs = vec![Proc {
            pid,
            status: ProcStatus::Running,
            cmd: argv.join(" "),
        }];
        let id = self.jobs.add(pid, procs, job_control);
        self.wait_foreground(id)
    }

    /// Command lookup: special builtins, functions (unless excluded),
    /// regular builtins, then `PATH`.
    pub(crate) fn resolve(&mut self, name: &str, functions: bool) -> Target {
        if name.contains('/') {
            return self.external_target(name);
        }
        let builtin = builtins::lookup(name);
        if let Some(b) = builtin.filter(|b| b.special) {
            return Target::Builtin(b);
        }
        if functions {
            if let Some(body) = self.functions.get(name) {
                return Target::Function(body.clone());
            }
        }
        if let Some(b) = builtin {
            return Target::Builtin(b);
        }
        self.external_target(name)
    }

    fn external_target(&mut self, name: &str) -> Target {
        match self.find_command(name) {
            Lookup::Found(path) => Target::External(path.to_string_lossy().into_owned()),
            Lookup::NotExecutable(_) => Target::Missing(ShellError::NotExecutable(name.to_string())),
            Lookup::NotFound => Target::Missing(ShellError::NotFound(name.to_string())),
        }
    }

    /// `PATH` search through the remembered-location cache.
    pub(crate) fn find_command(&mut self, name: &str) -> Lookup {
        if name.contains('/') {
            return search_cmd(name, "");
        }
        if let Some(path) = self.cmd_cache.get(name) {
            let path = std::path::PathBuf::from(path);
            if is_executable(&path) {
                return Lookup::Found(path);
            }
            self.cmd_cache.remove(name);
        }
        let path_var = self.get_var("PATH").unwrap_or_default();
        let found = search_cmd(name, &path_var);
        if let Lookup::Found(path) = &found {
            self.cmd_cache
                .insert(name.to_string(), path.to_string_lossy().into_owned());
        }
        found
    }
}
