//! Job control builtins.

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;

use super::{parse_flags, print, print_lines};
use crate::jobs::{JobFormat, JobState, ProcStatus};
use crate::shell::Shell;
use crate::signals;
use crate::types::{ExecuteResult, ShellError, EXIT_NOTFOUND};

/// `jobs [-lp] [job...]`
pub fn jobs(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let (flags, operands) = parse_flags("jobs", &args[1..], "lp")?;
    let format = if flags.contains(&'p') {
        JobFormat::PidOnly
    } else if flags.contains(&'l') {
        JobFormat::Long
    } else {
        JobFormat::Normal
    };
    shell.reap_jobs();
    let ids = if operands.is_empty() {
        shell.jobs.ids()
    } else {
        let mut ids = Vec::new();
        for spec in operands {
            ids.push(shell.jobs.find(spec, "jobs")?);
        }
        ids
    };
    let mut lines = Vec::new();
    for id in ids {
        if let Some(line) = shell.jobs.line(id, format) {
            lines.push(line.to_string());
        }
        if let Some(job) = shell.jobs.get_mut(id) {
            job.changed = false;
        }
    }
    print_lines("jobs", &lines)?;
    shell.jobs.purge();
    Ok(0)
}

fn require_job_control(shell: &Shell, name: &str) -> Result<(), ShellError> {
    if shell.job_control() {
        Ok(())
    } else {
        Err(ShellError::builtin(name, "no job control"))
    }
}

/// Marks a job running again and sends it SIGCONT.
fn continue_job(shell: &mut Shell, id: usize, name: &str) -> Result<(), ShellError> {
    let Some(job) = shell.jobs.get_mut(id) else {
        return Err(ShellError::builtin(name, "no such job"));
    };
    for p in &mut job.procs {
        if matches!(p.status, ProcStatus::Stopped(_)) {
            p.status = ProcStatus::Running;
        }
    }
    job.state = JobState::Running;
    job.changed = false;
    let pgid = job.pgid;
    signal::killpg(Pid::from_raw(pgid), Signal::SIGCONT).map_err(|e| ShellError::os(name, e))?;
    shell.jobs.make_current(id);
    Ok(())
}

/// `fg [job]`
pub fn fg(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    require_job_control(shell, "fg")?;
    let id = shell.jobs.find(args.get(1).map_or("%+", String::as_str), "fg")?;
    let Some(job) = shell.jobs.get(id) else {
        return Err(ShellError::builtin("fg", "no such job").into());
    };
    let pgid = job.pgid;
    print("fg", &format!("{}\n", job.text()))?;
    if let Some(tty) = shell.tty_fd {
        let _ = crate::sys::tcsetpgrp(tty, pgid);
    }
    continue_job(shell, id, "fg")?;
    shell.wait_foreground(id)
}

/// `bg [job...]`
pub fn bg(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    require_job_control(shell, "bg")?;
    let specs: Vec<&str> = if args.len() > 1 {
        args[1..].iter().map(String::as_str).collect()
    } else {
        vec!["%+"]
    };
    for spec in specs {
        let id = shell.jobs.find(spec, "bg")?;
        if shell.jobs.get(id).map_or(false, |j| j.state == JobState::Running) {
            continue;
        }
        continue_job(shell, id, "bg")?;
        if let Some(job) = shell.jobs.get(id) {
            print("bg", &format!("[{}] {} &\n", id, job.text()))?;
        }
    }
    Ok(0)
}

/// Outcome of waiting on one job.
enum Waited {
    Status(i32),
    /// A trapped signal arrived: `wait` returns `128 + signal`.
    Interrupted(i32),
}

/// Blocks until job `id` is done, servicing traps as signals arrive.
fn wait_job(shell: &mut Shell, id: usize) -> ExecuteResult<Waited> {
    loop {
        let Some(job) = shell.jobs.get(id) else {
            return Ok(Waited::Status(EXIT_NOTFOUND));
        };
        if job.state == JobState::Done {
            let status = job.status(shell.options.get(crate::options::Opt::PipeFail));
            shell.jobs.remove(id);
            return Ok(Waited::Status(status));
        }
        if job.state == JobState::Stopped {
            return Ok(Waited::Status(job.status(false)));
        }
        let Some(pid) = job.procs.iter().find(|p| !p.status.is_done()).map(|p| p.pid) else {
            return Ok(Waited::Status(0));
        };
        match waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WUNTRACED)) {
            Ok(ws) => {
                if let Some((p, st)) = ProcStatus::from_wait(ws) {
                    shell.jobs.record(p, st);
                    if matches!(st, ProcStatus::Stopped(_)) {
                        let status = st.exit_code();
                        return Ok(Waited::Status(status));
                    }
                }
            }
            Err(Errno::EINTR) => {
                if let Some(sig) = shell.service_signals()? {
                    return Ok(Waited::Interrupted(sig));
                }
            }
            Err(_) => {
                shell.jobs.record(Pid::from_raw(pid), ProcStatus::Exited(EXIT_NOTFOUND));
            }
        }
    }
}

/// `wait [pid | job...]`
pub fn wait(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    if args.len() == 1 {
        for id in shell.jobs.ids() {
            if let Waited::Interrupted(sig) = wait_job(shell, id)? {
                return Ok(128 + sig);
            }
        }
        return Ok(0);
    }
    let mut status = 0;
    for spec in &args[1..] {
        let id = if spec.starts_with('%') {
            shell.jobs.find(spec, "wait")?
        } else {
            let pid: i32 = spec
                .parse()
                .map_err(|_| ShellError::builtin("wait", format!("Illegal number: {}", spec)))?;
            match shell.jobs.by_pid(pid) {
                Some(id) => id,
                None => {
                    status = EXIT_NOTFOUND;
                    continue;
                }
            }
        };
        status = match wait_job(shell, id)? {
            Waited::Status(s) => s,
            Waited::Interrupted(sig) => return Ok(128 + sig),
        };
    }
    Ok(status)
}

/// `kill -l [status]` output.
fn list_signals(args: &[String]) -> Result<String, ShellError> {
    if let Some(arg) = args.first() {
        let n: i32 = arg
            .parse()
            .map_err(|_| ShellError::builtin("kill", format!("invalid signal number: {}", arg)))?;
        let sig = if n > 128 { n - 128 } else { n };
        return Ok(format!("{}\n", signals::signal_name(sig)));
    }
    let names: Vec<String> = signals::all_signals().into_iter().map(|(_, name)| name).collect();
    Ok(format!("{}\n", names.join(" ")))
}

fn signal_number(name: &str) -> Result<i32, ShellError> {
    match signals::parse_signal(name) {
        Some(n) if n > 0 && n < signals::NSIG => Ok(n as i32),
        Some(0) if name == "0" => Ok(0),
        _ => Err(ShellError::builtin("kill", format!("{}: invalid signal specification", name))),
    }
}

/// `kill [-s sig | -sig] pid | job...` and `kill -l [status]`.
pub fn kill(shell: &mut Shell, args: &[String]) -> ExecuteResult<i32> {
    let mut sig = libc::SIGTERM;
    let mut i = 1;
    match args.get(1).map(String::as_str) {
        Some("-l") | Some("-L") => {
            print("kill", &list_signals(&args[2..])?)?;
            return Ok(0);
        }
        Some("-s") | Some("-n") => {
            let name = args
                .get(2)
                .ok_or_else(|| ShellError::builtin("kill", "option requires an argument"))?;
            sig = signal_number(name)?;
            i = 3;
        }
        Some("--") => i = 2,
        Some(opt) if opt.starts_with('-') && opt.len() > 1 => {
            sig = signal_number(&opt[1..])?;
            i = 2;
        }
        _ => {}
    }
    if i < args.len() && args[i] == "--" {
        i += 1;
    }
    if i >= args.len() {
        return Err(ShellError::builtin("kill", "usage: kill [-s sigspec | -signum] pid | jobspec ...").into());
    }
    let signal = if sig == 0 {
        None
    } else {
        Some(Signal::try_from(sig).map_err(|e| ShellError::os("kill", e))?)
    };
    let mut status = 0;
    for target in &args[i..] {
        let result = if target.starts_with('%') {
            match shell.jobs.find(target, "kill") {
                Ok(id) => {
                    let Some(job) = shell.jobs.get(id) else { continue };
                    if job.job_control {
                        signal::killpg(Pid::from_raw(job.pgid), signal)
                    } else {
                        job.procs
                            .iter()
                            .filter(|p| !p.status.is_done())
                            .try_for_each(|p| signal::kill(Pid::from_raw(p.pid), signal))
                    }
                }
                Err(e) => {
                    shell.report(&e);
                    status = 1;
                    continue;
                }
            }
        } else {
            match target.parse::<i32>() {
                Ok(pid) => signal::kill(Pid::from_raw(pid), signal),
                Err(_) => {
                    shell.report(&ShellError::builtin("kill", format!("{}: arguments must be process or job IDs", target)));
                    status = 1;
                    continue;
                }
            }
        };
        if let Err(e) = result {
            shell.report(&ShellError::os(format!("kill: {}", target), e));
            status = 1;
        }
    }
    Ok(status)
}
