//! Job table: one entry per pipeline started by the shell.

use std::fmt;

use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

use crate::signals::signal_name;
use crate::types::ShellError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcStatus {
    Running,
    Stopped(i32),
    Exited(i32),
    Signaled { signal: i32, core: bool },
}

impl ProcStatus {
    pub fn from_wait(status: WaitStatus) -> Option<(Pid, ProcStatus)> {
        match status {
            WaitStatus::Exited(pid, code) => Some((pid, ProcStatus::Exited(code))),
            WaitStatus::Signaled(pid, sig, core) => Some((
                pid,
                ProcStatus::Signaled {
                    signal: sig as i32,
                    core,
                },
            )),
            WaitStatus::Stopped(pid, sig) => Some((pid, ProcStatus::Stopped(sig as i32))),
            WaitStatus::Continued(pid) => Some((pid, ProcStatus::Running)),
            _ => None,
        }
    }

    /// The value `$?` takes for this status.
    pub fn exit_code(&self) -> i32 {
        match *self {
            ProcStatus::Running => 0,
            ProcStatus::Stopped(sig) => 128 + sig,
            ProcStatus::Exited(code) => code,
            ProcStatus::Signaled { signal, .. } => 128 + signal,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ProcStatus::Exited(_) | ProcStatus::Signaled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Running,
    Stopped,
    Done,
}

#[derive(Debug, Clone)]
pub struct Proc {
    pub pid: i32,
    pub status: ProcStatus,
    pub cmd: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: usize,
    pub pgid: i32,
    pub procs: Vec<Proc>,
    pub state: JobState,
    /// Started with its own process group under `set -m`.
    pub job_control: bool,
    /// A state change has not been reported yet.
    pub changed: bool,
    /// The final status was collected by `wait` or the foreground wait.
    pub waited: bool,
    /// Ended because of SIGINT.
    pub sigint: bool,
}

impl Job {
    pub fn text(&self) -> String {
        self.procs
            .iter()
            .map(|p| p.cmd.as_str())
            .collect::<Vec<_>>()
            .join(" | ")
    }

    /// Exit status of the pipeline: the last process, or with `pipefail` the
    /// last non-zero one.
    pub fn status(&self, pipefail: bool) -> i32 {
        if pipefail {
            if let Some(p) = self.procs.iter().rev().find(|p| p.status.exit_code() != 0) {
                return p.status.exit_code();
            }
        }
        self.procs.last().map_or(0, |p| p.status.exit_code())
    }

    fn update_state(&mut self) {
        let old = self.state;
        self.state = if self.procs.iter().all(|p| p.status.is_done()) {
            JobState::Done
        } else if self
            .procs
            .iter()
            .all(|p| p.status.is_done() || matches!(p.status, ProcStatus::Stopped(_)))
        {
            JobState::Stopped
        } else {
            JobState::Running
        };
        if self.state != old {
            self.changed = true;
            tracing::debug!(job = self.id, from = ?old, to = ?self.state, "job state");
        }
        self.sigint = self.procs.iter().any(|p| {
            matches!(p.status, ProcStatus::Signaled { signal, .. } if signal == libc::SIGINT)
        });
    }

    fn state_text(&self) -> String {
        match self.state {
            JobState::Running => "Running".to_string(),
            JobState::Stopped => {
                let sig = self.procs.iter().find_map(|p| match p.status {
                    ProcStatus::Stopped(s) => Some(s),
                    _ => None,
                });
                match sig {
                    Some(s) if s == libc::SIGTSTP => "Stopped".to_string(),
                    Some(s) => format!("Stopped ({})", signal_name(s)),
                    None => "Stopped".to_string(),
                }
            }
            JobState::Done => match self.procs.last().map(|p| p.status) {
                Some(ProcStatus::Exited(0)) | None => "Done".to_string(),
                Some(ProcStatus::Exited(code)) => format!("Done({})", code),
                Some(ProcStatus::Signaled { signal, core }) => {
                    let name = describe_signal(signal);
                    if core {
                        format!("{} (core dumped)", name)
                    } else {
                        name
                    }
                }
                Some(_) => "Done".to_string(),
            },
        }
    }
}

/// Text printed when a job is killed by `signal`.
pub fn describe_signal(signal: i32) -> String {
    match signal {
        libc::SIGHUP => "Hangup".into(),
        libc::SIGINT => "Interrupt".into(),
        libc::SIGQUIT => "Quit".into(),
        libc::SIGILL => "Illegal instruction".into(),
        libc::SIGABRT => "Aborted".into(),
        libc::SIGFPE => "Floating point exception".into(),
        libc::SIGKILL => "Killed".into(),
        libc::SIGSEGV => "Segmentation fault".into(),
        libc::SIGPIPE => "Broken pipe".into(),
        libc::SIGALRM => "Alarm clock".into(),
        libc::SIGTERM => "Terminated".into(),
        other => format!("Signal {}", other),
    }
}

/// How `jobs` prints an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFormat {
    Normal,
    Long,
    PidOnly,
}

pub struct JobLine<'a> {
    job: &'a Job,
    mark: char,
    format: JobFormat,
}

impl fmt::Display for JobLine<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let job = self.job;
        match self.format {
            JobFormat::PidOnly => write!(f, "{}", job.pgid),
            JobFormat::Normal => write!(
                f,
                "[{}] {} {:<27} {}",
                job.id,
                self.mark,
                job.state_text(),
                job.text()
            ),
            JobFormat::Long => {
                for (i, p) in job.procs.iter().enumerate() {
                    if i == 0 {
                        write!(f, "[{}] {} {:>5} {:<27} {}", job.id, self.mark, p.pid, job.state_text(), p.cmd)?;
                    } else {
                        write!(f, "\n      {:>5}                             | {}", p.pid, p.cmd)?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobTable {
    jobs: Vec<Job>,
    /// Job ids, most recent first, for `%+` and `%-`.
    order: Vec<usize>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a newly started pipeline and returns its job id.
    pub fn add(&mut self, pgid: i32, procs: Vec<Proc>, job_control: bool) -> usize {
        let id = (1..).find(|n| !self.jobs.iter().any(|j| j.id == *n)).unwrap_or(1);
        self.jobs.push(Job {
            id,
            pgid,
            procs,
            state: JobState::Running,
            job_control,
            changed: false,
            waited: false,
            sigint: false,
        });
        self.order.insert(0, id);
        id
    }

    pub fn get(&self, id: usize) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    pub fn ids(&self) -> Vec<usize> {
        let mut ids: Vec<usize> = self.jobs.iter().map(|j| j.id).collect();
        ids.sort_unstable();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Makes `id` the current job.
    pub fn make_current(&mut self, id: usize) {
        self.order.retain(|&j| j != id);
        self.order.insert(0, id);
    }

    /// Applies a wait result. Returns the job it belonged to.
    pub fn record(&mut self, pid: Pid, status: ProcStatus) -> Option<usize> {
        let raw = pid.as_raw();
        for job in &mut self.jobs {
            if let Some(p) = job.procs.iter_mut().find(|p| p.pid == raw) {
                p.status = status;
                job.update_state();
                return Some(job.id);
            }
        }
        None
    }

    pub fn remove(&mut self, id: usize) {
        self.jobs.retain(|j| j.id != id);
        self.order.retain(|&j| j != id);
    }

    /// Job that owns process `pid`.
    pub fn by_pid(&self, pid: i32) -> Option<usize> {
        self.jobs
            .iter()
            .find(|j| j.pgid == pid || j.procs.iter().any(|p| p.pid == pid))
            .map(|j| j.id)
    }

    fn mark(&self, id: usize) -> char {
        match self.order.iter().position(|&j| j == id) {
            Some(0) => '+',
            Some(1) => '-',
            _ => ' ',
        }
    }

    pub fn line(&self, id: usize, format: JobFormat) -> Option<JobLine<'_>> {
        let job = self.get(id)?;
        Some(JobLine {
            job,
            mark: self.mark(id),
            format,
        })
    }

    /// Resolves a job specification: `%n`, `%+`, `%%`, `%-`, `%prefix`,
    /// `%?substring`, or a process id.
    pub fn find(&self, spec: &str, context: &str) -> Result<usize, ShellError> {
        let no_such = || ShellError::builtin(context, format!("{}: no such job", spec));
        let Some(rest) = spec.strip_prefix('%') else {
            let pid: i32 = spec
                .parse()
                .map_err(|_| ShellError::builtin(context, format!("Illegal job: {}", spec)))?;
            return self.by_pid(pid).ok_or_else(no_such);
        };
        match rest {
            "" | "+" | "%" => self.order.first().copied().ok_or_else(no_such),
            "-" => self
                .order
                .get(1)
                .or_else(|| self.order.first())
                .copied()
                .ok_or_else(no_such),
            _ if rest.bytes().all(|b| b.is_ascii_digit()) => {
                let id: usize = rest.parse().map_err(|_| no_such())?;
                self.get(id).map(|j| j.id).ok_or_else(no_such)
            }
            _ => {
                let matches: Vec<usize> = match rest.strip_prefix('?') {
                    Some(sub) => self
                        .jobs
                        .iter()
                        .filter(|j| j.text().contains(sub))
                        .map(|j| j.id)
                        .collect(),
                    None => self
                        .jobs
                        .iter()
                        .filter(|j| j.text().starts_with(rest))
                        .map(|j| j.id)
                        .collect(),
                };
                match matches.as_slice() {
                    [id] => Ok(*id),
                    [] => Err(no_such()),
                    _ => Err(ShellError::builtin(context, format!("{}: ambiguous", spec))),
                }
            }
        }
    }

    /// Jobs with an unreported state change, marking them reported.
    pub fn take_changed(&mut self) -> Vec<usize> {
        let mut ids = Vec::new();
        for job in &mut self.jobs {
            if job.changed && !job.waited {
                job.changed = false;
                ids.push(job.id);
            }
        }
        ids
    }

    /// Drops finished jobs that have been reported or waited for.
    pub fn purge(&mut self) {
        let done: Vec<usize> = self
            .jobs
            .iter()
            .filter(|j| j.state == JobState::Done && (j.waited || !j.changed))
            .map(|j| j.id)
            .collect();
        for id in done {
            self.remove(id);
        }
    }

    /// Pids of every live process, used when the shell exits.
    pub fn live_pgids(&self) -> Vec<i32> {
        self.jobs
            .iter()
            .filter(|j| j.state != JobState::Done)
            .map(|j| j.pgid)
            .collect()
    }
}
