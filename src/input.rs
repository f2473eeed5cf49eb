//! Interactive input: a rustyline editor on a terminal, prompted plain
//! reads otherwise.

use std::cell::RefCell;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use rustyline::config::Configurer;
use rustyline::error::ReadlineError;
use rustyline::history::{DefaultHistory, History as _};
use rustyline::{Config, EditMode, Editor};

use crate::completion::Completer;
use crate::history::{History, HistoryMark};
use crate::lexer::{FdSource, LineSource, Prompt};
use crate::sys;

enum Backend {
    Editor(Box<Editor<Completer, DefaultHistory>>),
    Plain(FdSource),
}

/// Line source for an interactive shell. Every line read is added to the
/// shared history.
pub struct InteractiveSource {
    backend: Backend,
    ps1: String,
    ps2: String,
    timeout: Option<Duration>,
    history: Rc<RefCell<History>>,
    /// How much of `history` the editor has been given.
    synced: HistoryMark,
}

fn io_error(e: ReadlineError) -> io::Error {
    match e {
        ReadlineError::Io(e) => e,
        e => io::Error::new(io::ErrorKind::Other, e.to_string()),
    }
}

/// Brings the editor's own history up to date with the shared one.
fn sync_history(
    editor: &mut Editor<Completer, DefaultHistory>,
    shared: &History,
    synced: &mut HistoryMark,
) -> io::Result<()> {
    let (fresh, mark) = shared.since(*synced);
    let history = editor.history_mut();
    let fresh = match fresh {
        Some(fresh) => fresh,
        None => {
            history.clear().map_err(io_error)?;
            shared.entries()
        }
    };
    for entry in fresh {
        history.add(entry).map_err(io_error)?;
    }
    *synced = mark;
    Ok(())
}

impl InteractiveSource {
    pub fn new(history: Rc<RefCell<History>>, completions: Rc<RefCell<Vec<String>>>) -> Self {
        let backend = if sys::isatty(0) && sys::isatty(2) {
            let config = Config::builder().auto_add_history(false).build();
            match Editor::with_config(config) {
                Ok(mut editor) => {
                    editor.set_helper(Some(Completer::new(completions)));
                    Backend::Editor(Box::new(editor))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "line editing unavailable");
                    Backend::Plain(FdSource::new(0))
                }
            }
        } else {
            Backend::Plain(FdSource::new(0))
        };
        Self {
            backend,
            ps1: "$ ".to_string(),
            ps2: "> ".to_string(),
            timeout: None,
            history,
            synced: HistoryMark::default(),
        }
    }

    /// Waits for input for at most the configured timeout, with the prompt
    /// already shown.
    fn wait_for_input(&self, prompt: &str) -> io::Result<()> {
        let Some(timeout) = self.timeout else {
            return Ok(());
        };
        let _ = sys::write_all(2, prompt.as_bytes());
        let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
        match sys::poll_readable(0, ms) {
            Ok(true) => Ok(()),
            Ok(false) => Err(io::Error::from(io::ErrorKind::TimedOut)),
            Err(nix::errno::Errno::EINTR) => Err(io::Error::from(io::ErrorKind::Interrupted)),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl LineSource for InteractiveSource {
    fn read_line(&mut self, prompt: Prompt) -> io::Result<Option<String>> {
        let text = match prompt {
            Prompt::Primary => self.ps1.clone(),
            Prompt::Secondary => self.ps2.clone(),
        };
        if prompt == Prompt::Primary {
            self.wait_for_input(&text)?;
        }
        let prompted = prompt == Prompt::Primary && self.timeout.is_some();
        let line = match &mut self.backend {
            Backend::Editor(editor) => {
                sync_history(editor, &self.history.borrow(), &mut self.synced)?;
                if prompted {
                    let _ = sys::write_all(2, b"\r");
                }
                match editor.readline(&text) {
                    Ok(mut line) => {
                        line.push('\n');
                        Some(line)
                    }
                    Err(ReadlineError::Interrupted) => {
                        return Err(io::Error::from(io::ErrorKind::Interrupted));
                    }
                    Err(ReadlineError::Eof) => None,
                    Err(e) => return Err(io_error(e)),
                }
            }
            Backend::Plain(source) => {
                if !prompted {
                    let _ = sys::write_all(2, text.as_bytes());
                }
                source.read_line(prompt)?
            }
        };
        if let Some(line) = &line {
            self.history.borrow_mut().add(line);
        }
        Ok(line)
    }

    fn set_prompts(&mut self, ps1: &str, ps2: &str) {
        self.ps1 = ps1.to_string();
        self.ps2 = ps2.to_string();
    }

    fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    fn set_edit_mode(&mut self, vi: bool) {
        if let Backend::Editor(editor) = &mut self.backend {
            editor.set_edit_mode(if vi { EditMode::Vi } else { EditMode::Emacs });
        }
    }

    fn is_interactive(&self) -> bool {
        true
    }
}
