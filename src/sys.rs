//! Descriptor, terminal and resource helpers over `nix`, returning `Errno`
//! on failure.

use std::ffi::CString;
use std::os::fd::BorrowedFd;
use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg, FdFlag, OFlag};
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::resource::{self, Resource, UsageWho};
use nix::sys::stat::{self, Mode};
use nix::sys::termios::{self, LocalFlags, SetArg, Termios};
use nix::unistd::{self, Pid};

pub use nix::unistd::{close, pipe, read, write};

/// First descriptor used for saved copies, above the user-visible range.
pub const SAVE_FD_BASE: RawFd = 10;

/// Borrows a descriptor the caller keeps open for the duration of the call.
fn borrow<'a>(fd: RawFd) -> BorrowedFd<'a> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

pub fn dup2(old: RawFd, new: RawFd) -> Result<RawFd, Errno> {
    loop {
        match unistd::dup2(old, new) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

/// Duplicates `fd` to the lowest free descriptor at or above `min`, with
/// close-on-exec set.
pub fn dup_above(fd: RawFd, min: RawFd) -> Result<RawFd, Errno> {
    fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(min))
}

/// Duplicates `fd` to the lowest free descriptor at or above `min`,
/// inheritable across exec.
pub fn dup_inheritable(fd: RawFd, min: RawFd) -> Result<RawFd, Errno> {
    fcntl::fcntl(fd, FcntlArg::F_DUPFD(min))
}

pub fn is_open(fd: RawFd) -> bool {
    fcntl::fcntl(fd, FcntlArg::F_GETFD).is_ok()
}

pub fn set_cloexec(fd: RawFd, on: bool) -> Result<(), Errno> {
    let mut flags = FdFlag::from_bits_truncate(fcntl::fcntl(fd, FcntlArg::F_GETFD)?);
    flags.set(FdFlag::FD_CLOEXEC, on);
    fcntl::fcntl(fd, FcntlArg::F_SETFD(flags)).map(drop)
}

/// Writes all of `buf`, retrying on interruption.
pub fn write_all(fd: RawFd, mut buf: &[u8]) -> Result<(), Errno> {
    while !buf.is_empty() {
        match write(fd, buf) {
            Ok(n) => buf = &buf[n..],
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Reads everything until end of file.
pub fn read_to_end(fd: RawFd) -> Result<Vec<u8>, Errno> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match read(fd, &mut chunk) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Waits up to `timeout_ms` for `fd` to become readable. `Ok(false)` on
/// timeout.
pub fn poll_readable(fd: RawFd, timeout_ms: i32) -> Result<bool, Errno> {
    let fd = borrow(fd);
    let mut fds = [PollFd::new(&fd, PollFlags::POLLIN)];
    Ok(poll(&mut fds, timeout_ms)? > 0)
}

pub fn open(path: &str, flags: OFlag, mode: Mode) -> Result<RawFd, Errno> {
    loop {
        match fcntl::open(path, flags, mode) {
            Err(Errno::EINTR) => continue,
            other => return other,
        }
    }
}

pub fn isatty(fd: RawFd) -> bool {
    unistd::isatty(fd).unwrap_or(false)
}

/// Hands the terminal to process group `pgid`.
pub fn tcsetpgrp(fd: RawFd, pgid: i32) -> Result<(), Errno> {
    unistd::tcsetpgrp(fd, Pid::from_raw(pgid))
}

/// Turns off terminal echo on `fd`, returning the settings to restore.
pub fn disable_echo(fd: RawFd) -> Result<Termios, Errno> {
    let saved = termios::tcgetattr(borrow(fd))?;
    let mut quiet = saved.clone();
    quiet.local_flags.remove(LocalFlags::ECHO | LocalFlags::ECHONL);
    termios::tcsetattr(borrow(fd), SetArg::TCSANOW, &quiet)?;
    Ok(saved)
}

pub fn restore_terminal(fd: RawFd, saved: &Termios) {
    let _ = termios::tcsetattr(borrow(fd), SetArg::TCSANOW, saved);
}

/// Sets the file creation mask, returning the previous one.
pub fn umask(mask: u32) -> u32 {
    let old = stat::umask(Mode::from_bits_truncate((mask & 0o777) as libc::mode_t));
    old.bits() as u32
}

/// The current umask, read by setting and restoring it.
pub fn get_umask() -> u32 {
    let old = umask(0o022);
    umask(old);
    old
}

/// Resource limits reported and set by `ulimit`.
#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub letter: char,
    pub name: &'static str,
    pub resource: Resource,
    /// Units the user-facing number is expressed in.
    pub factor: u64,
}

pub const LIMITS: &[Limit] = &[
    Limit { letter: 't', name: "time(seconds)", resource: Resource::RLIMIT_CPU, factor: 1 },
    Limit { letter: 'f', name: "file(blocks)", resource: Resource::RLIMIT_FSIZE, factor: 512 },
    Limit { letter: 'd', name: "data(kb)", resource: Resource::RLIMIT_DATA, factor: 1024 },
    Limit { letter: 's', name: "stack(kb)", resource: Resource::RLIMIT_STACK, factor: 1024 },
    Limit { letter: 'c', name: "coredump(blocks)", resource: Resource::RLIMIT_CORE, factor: 512 },
    Limit { letter: 'm', name: "memory(kb)", resource: Resource::RLIMIT_RSS, factor: 1024 },
    Limit { letter: 'l', name: "locked memory(kb)", resource: Resource::RLIMIT_MEMLOCK, factor: 1024 },
    Limit { letter: 'p', name: "process", resource: Resource::RLIMIT_NPROC, factor: 1 },
    Limit { letter: 'n', name: "nofiles", resource: Resource::RLIMIT_NOFILE, factor: 1 },
    Limit { letter: 'v', name: "vmemory(kb)", resource: Resource::RLIMIT_AS, factor: 1024 },
];

pub const RLIM_INFINITY: u64 = resource::RLIM_INFINITY as u64;

pub fn getrlimit(res: Resource) -> Result<(u64, u64), Errno> {
    let (soft, hard) = resource::getrlimit(res)?;
    Ok((soft as u64, hard as u64))
}

pub fn setrlimit(res: Resource, soft: u64, hard: u64) -> Result<(), Errno> {
    resource::setrlimit(res, soft as libc::rlim_t, hard as libc::rlim_t)
}

/// User and system CPU time of the shell and of its reaped children, in
/// seconds.
pub fn times() -> [(f64, f64); 2] {
    [usage(UsageWho::RUSAGE_SELF), usage(UsageWho::RUSAGE_CHILDREN)]
}

fn usage(who: UsageWho) -> (f64, f64) {
    let Ok(ru) = resource::getrusage(who) else {
        return (0.0, 0.0);
    };
    let secs = |tv: nix::sys::time::TimeVal| tv.tv_sec() as f64 + tv.tv_usec() as f64 / 1_000_000.0;
    (secs(ru.user_time()), secs(ru.system_time()))
}

/// Replaces the process image. Only returns on failure.
pub fn execve(path: &str, argv: &[String], env: &[(String, String)]) -> Errno {
    let to_c = |s: &str| CString::new(s.as_bytes()).unwrap_or_default();
    let c_path = to_c(path);
    let c_argv: Vec<CString> = argv.iter().map(|a| to_c(a)).collect();
    let c_env: Vec<CString> = env.iter().map(|(k, v)| to_c(&format!("{}={}", k, v))).collect();
    match unistd::execve(&c_path, &c_argv, &c_env) {
        Ok(never) => match never {},
        Err(e) => e,
    }
}

/// Exits immediately without running destructors or flushing buffers, as a
/// forked child must.
pub fn exit_now(status: i32) -> ! {
    unsafe { libc::_exit(status) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipe_round_trip_and_poll() -> Result<(), Errno> {
        let (r, w) = pipe()?;
        assert!(!poll_readable(r, 0)?);
        write_all(w, b"block")?;
        assert!(poll_readable(r, 1000)?);
        close(w)?;
        assert_eq!(read_to_end(r)?, b"block");
        close(r)
    }

    #[test]
    fn test_saved_copies_sit_above_the_base() -> Result<(), Errno> {
        let (r, w) = pipe()?;
        let saved = dup_above(r, SAVE_FD_BASE)?;
        assert!(saved >= SAVE_FD_BASE);
        assert!(is_open(saved));
        let flags = FdFlag::from_bits_truncate(fcntl::fcntl(saved, FcntlArg::F_GETFD)?);
        assert!(flags.contains(FdFlag::FD_CLOEXEC));
        set_cloexec(saved, false)?;
        let flags = FdFlag::from_bits_truncate(fcntl::fcntl(saved, FcntlArg::F_GETFD)?);
        assert!(!flags.contains(FdFlag::FD_CLOEXEC));
        for fd in [saved, r, w] {
            close(fd)?;
        }
        assert!(!is_open(saved));
        Ok(())
    }

    #[test]
    fn test_open_and_limits() -> Result<(), Errno> {
        let fd = open("/dev/null", OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())?;
        assert_eq!(read_to_end(fd)?, b"");
        close(fd)?;
        assert_eq!(open("/nonexistent-ashrs/x", OFlag::O_RDONLY, Mode::empty()), Err(Errno::ENOENT));

        let (soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
        assert!(hard == RLIM_INFINITY || soft <= hard);
        let [(user, system), _] = times();
        assert!(user >= 0.0 && system >= 0.0);
        Ok(())
    }
}
