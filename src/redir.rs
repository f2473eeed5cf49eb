//! Redirection scopes.
//!
//! Applying a command's redirections pushes a frame recording, for each
//! descriptor touched, a close-on-exec copy of what it referred to before.
//! Popping the frame puts every descriptor back.

use std::os::unix::io::RawFd;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::stat::Mode;

use crate::ast::{FileMode, Redir};
use crate::options::Opt;
use crate::shell::Shell;
use crate::spawn::{ChildSetup, Continuation};
use crate::sys;
use crate::types::{ExecuteResult, ShellError};

/// Bytes that can be written to a pipe without blocking.
const PIPE_BUF: usize = 4096;

#[derive(Debug, Clone, Copy)]
struct Saved {
    fd: RawFd,
    /// Copy of the previous descriptor, or `None` if `fd` was closed.
    copy: Option<RawFd>,
}

#[derive(Debug, Default)]
pub struct RedirFrame {
    saved: Vec<Saved>,
}

#[derive(Debug, Default)]
pub struct RedirStack {
    frames: Vec<RedirFrame>,
}

/// Whether redirections are undone when the command finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Restore,
    /// `exec` with no command: changes are permanent.
    Permanent,
}

impl RedirStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn push(&mut self) {
        self.frames.push(RedirFrame::default());
    }

    /// Saves `fd` in the innermost frame before it is replaced.
    fn save(&mut self, fd: RawFd) -> Result<(), ShellError> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        if frame.saved.iter().any(|s| s.fd == fd) {
            return Ok(());
        }
        let copy = match sys::dup_above(fd, sys::SAVE_FD_BASE) {
            Ok(copy) => Some(copy),
            Err(Errno::EBADF) => None,
            Err(e) => return Err(ShellError::os(fd.to_string(), e)),
        };
        frame.saved.push(Saved { fd, copy });
        Ok(())
    }

    /// Restores the innermost frame.
    pub fn pop(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        for saved in frame.saved.into_iter().rev() {
            match saved.copy {
                Some(copy) => {
                    let _ = sys::dup2(copy, saved.fd);
                    let _ = sys::close(copy);
                }
                None => {
                    let _ = sys::close(saved.fd);
                }
            }
        }
    }

    /// Restores every frame down to `depth`, as when an error unwinds.
    pub fn unwind_to(&mut self, depth: usize) {
        while self.frames.len() > depth {
            self.pop();
        }
    }

    /// Forgets the saved copies without restoring, making the current
    /// layout permanent (`exec` in a child about to be replaced).
    pub fn discard_all(&mut self) {
        for frame in self.frames.drain(..) {
            for saved in frame.saved {
                if let Some(copy) = saved.copy {
                    let _ = sys::close(copy);
                }
            }
        }
    }

    /// Descriptors holding saved copies.
    pub fn saved_fds(&self) -> Vec<RawFd> {
        self.frames
            .iter()
            .flat_map(|f| f.saved.iter().filter_map(|s| s.copy))
            .collect()
    }
}

pub(crate) fn errno_reason(action: &str, e: Errno) -> String {
    match e {
        Errno::ENOENT if action == "open" => "No such file".to_string(),
        Errno::ENOENT => "Directory nonexistent".to_string(),
        Errno::EEXIST => "File exists".to_string(),
        other => other.desc().to_string(),
    }
}

/// Moves `opened` onto `fd`.
fn install(opened: RawFd, fd: RawFd) -> Result<(), ShellError> {
    if opened == fd {
        return sys::set_cloexec(fd, false).map_err(|e| ShellError::os(fd.to_string(), e));
    }
    sys::dup2(opened, fd).map_err(|e| ShellError::os(fd.to_string(), e))?;
    let _ = sys::close(opened);
    Ok(())
}

impl Shell {
    /// Applies `redirs`. With [`Scope::Restore`] a frame is pushed that the
    /// caller must pop with `self.redirs.pop()`, even on error.
    pub fn apply_redirs(&mut self, redirs: &[Redir], scope: Scope) -> ExecuteResult<()> {
        if scope == Scope::Restore {
            self.redirs.push();
        }
        for redir in redirs {
            tracing::trace!(redirection = %redir, "apply");
            self.apply_one(redir, scope)?;
        }
        Ok(())
    }

    fn apply_one(&mut self, redir: &Redir, scope: Scope) -> ExecuteResult<()> {
        let save = |shell: &mut Shell, fd: RawFd| -> Result<(), ShellError> {
            if scope == Scope::Restore {
                shell.redirs.save(fd)?;
            }
            Ok(())
        };
        match redir {
            Redir::File { fd, mode, target } => {
                let path = self.expand_word(target)?;
                save(self, *fd)?;
                let opened = self.open_redirect(&path, *mode)?;
                install(opened, *fd)?;
            }
            Redir::Dup { fd, output, target } => {
                let text = self.expand_word(target)?;
                if text == "-" {
                    save(self, *fd)?;
                    let _ = sys::close(*fd);
                } else if let Ok(src) = text.parse::<RawFd>() {
                    if src == *fd {
                        if !sys::is_open(src) {
                            return Err(ShellError::BadFd(text).into());
                        }
                        return Ok(());
                    }
                    if !sys::is_open(src) || self.redirs.saved_fds().contains(&src) {
                        return Err(ShellError::BadFd(text).into());
                    }
                    save(self, *fd)?;
                    sys::dup2(src, *fd).map_err(|_| ShellError::BadFd(text.clone()))?;
                } else if *output && *fd == 1 && !self.options.get(Opt::Posix) {
                    // `>&file`: both standard output and standard error.
                    save(self, 1)?;
                    save(self, 2)?;
                    let opened = self.open_redirect(&text, FileMode::Write)?;
                    sys::dup2(opened, 2).map_err(|e| ShellError::os("2", e))?;
                    install(opened, 1)?;
                } else {
                    return Err(ShellError::BadFd(text).into());
                }
            }
            Redir::HereDoc { fd, doc } => {
                let text = self.expand_quoted(&doc.body)?;
                save(self, *fd)?;
                let read_end = self.heredoc_pipe(text)?;
                install(read_end, *fd)?;
            }
        }
        Ok(())
    }

    fn open_redirect(&self, path: &str, mode: FileMode) -> Result<RawFd, ShellError> {
        let (flags, action) = match mode {
            FileMode::Read => (OFlag::O_RDONLY, "open"),
            FileMode::Write if self.options.get(Opt::NoClobber) => {
                // Refuse to truncate an existing regular file.
                if let Ok(meta) = std::fs::metadata(path) {
                    if meta.is_file() {
                        return Err(ShellError::Redirect {
                            action: "create",
                            path: path.to_string(),
                            reason: "File exists".into(),
                        });
                    }
                }
                (OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, "create")
            }
            FileMode::Write | FileMode::Clobber => (OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC, "create"),
            FileMode::Append => (OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND, "create"),
            FileMode::ReadWrite => (OFlag::O_RDWR | OFlag::O_CREAT, "create"),
        };
        let mode = Mode::from_bits_truncate(0o666);
        sys::open(path, flags | OFlag::O_CLOEXEC, mode).map_err(|e| ShellError::Redirect {
            action,
            path: path.to_string(),
            reason: errno_reason(action, e),
        })
    }

    /// A pipe whose read end yields `text`. Small bodies are written
    /// directly; larger ones by a writer process so neither side blocks.
    fn heredoc_pipe(&mut self, text: String) -> ExecuteResult<RawFd> {
        let (read_end, write_end) = sys::pipe().map_err(|e| ShellError::os("pipe", e))?;
        if text.len() <= PIPE_BUF {
            let result = sys::write_all(write_end, text.as_bytes());
            let _ = sys::close(write_end);
            result.map_err(|e| ShellError::os("here-document", e))?;
            return Ok(read_end);
        }
        let setup = ChildSetup {
            dups: vec![(write_end, 1)],
            close: vec![read_end, write_end],
            ..ChildSetup::default()
        };
        let spawned = self.spawn_continuation(Continuation::HereDocWriter(&text), &setup);
        let _ = sys::close(write_end);
        match spawned {
            Ok(pid) => {
                self.orphans.push(pid);
                Ok(read_end)
            }
            Err(e) => {
                let _ = sys::close(read_end);
                Err(e.into())
            }
        }
    }
}
