//! Signal dispositions and the trap table.
//!
//! Handlers only set a pending flag; the interpreter services pending
//! signals at command boundaries and inside its wait loops.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::types::ShellError;

/// Highest signal number plus one.
pub const NSIG: usize = 65;
/// Trap slot of the `EXIT` pseudo-signal.
pub const EXIT_TRAP: usize = 0;
/// Trap slot of the `ERR` pseudo-signal.
pub const ERR_TRAP: usize = NSIG;

static PENDING: [AtomicBool; NSIG] = [const { AtomicBool::new(false) }; NSIG];
static ANY_PENDING: AtomicBool = AtomicBool::new(false);

extern "C" fn on_signal(sig: libc::c_int) {
    if let Some(flag) = PENDING.get(sig as usize) {
        flag.store(true, Ordering::SeqCst);
        ANY_PENDING.store(true, Ordering::SeqCst);
    }
}

pub fn any_pending() -> bool {
    ANY_PENDING.load(Ordering::SeqCst)
}

/// Returns and clears the pending signals, lowest number first.
pub fn take_pending() -> Vec<i32> {
    if !ANY_PENDING.swap(false, Ordering::SeqCst) {
        return Vec::new();
    }
    (1..NSIG)
        .filter(|&sig| PENDING[sig].swap(false, Ordering::SeqCst))
        .map(|sig| sig as i32)
        .collect()
}

/// Clears one pending signal, reporting whether it was set.
pub fn take(sig: i32) -> bool {
    PENDING
        .get(sig as usize)
        .map_or(false, |f| f.swap(false, Ordering::SeqCst))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Default,
    Ignore,
    Catch,
}

pub fn set_disposition(sig: i32, disposition: Disposition) {
    let Ok(signal) = Signal::try_from(sig) else {
        return;
    };
    if matches!(signal, Signal::SIGKILL | Signal::SIGSTOP) {
        return;
    }
    let handler = match disposition {
        Disposition::Default => SigHandler::SigDfl,
        Disposition::Ignore => SigHandler::SigIgn,
        Disposition::Catch => SigHandler::Handler(on_signal),
    };
    let action = SigAction::new(handler, SaFlags::empty(), SigSet::empty());
    if let Err(e) = unsafe { sigaction(signal, &action) } {
        tracing::warn!(signal = sig, error = %e, "sigaction failed");
    }
}

/// True when the signal was ignored when the shell started.
pub fn ignored_at_entry(sig: i32) -> bool {
    let Ok(signal) = Signal::try_from(sig) else {
        return false;
    };
    let probe = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    match unsafe { sigaction(signal, &probe) } {
        Ok(old) => {
            let ignored = matches!(old.handler(), SigHandler::SigIgn);
            let _ = unsafe { sigaction(signal, &old) };
            ignored
        }
        Err(_) => false,
    }
}

/// Name of a signal without the `SIG` prefix.
pub fn signal_name(sig: i32) -> String {
    match Signal::try_from(sig) {
        Ok(s) => s.as_str().trim_start_matches("SIG").to_string(),
        Err(_) => sig.to_string(),
    }
}

/// Parses a trap or kill signal name: `INT`, `SIGINT`, `int` or a number.
/// `EXIT` and `ERR` map to their trap slots.
pub fn parse_signal(name: &str) -> Option<usize> {
    if let Ok(n) = name.parse::<usize>() {
        return (n < NSIG).then_some(n);
    }
    let upper = name.to_ascii_uppercase();
    let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
    match bare {
        "EXIT" => return Some(EXIT_TRAP),
        "ERR" => return Some(ERR_TRAP),
        _ => {}
    }
    Signal::iterator()
        .find(|s| s.as_str().trim_start_matches("SIG") == bare)
        .map(|s| s as usize)
}

/// Names of all signals, for `trap -l` and `kill -l`.
pub fn all_signals() -> Vec<(i32, String)> {
    Signal::iterator()
        .map(|s| (s as i32, s.as_str().trim_start_matches("SIG").to_string()))
        .collect()
}

/// Per-signal actions set with `trap`, plus `EXIT` and `ERR`.
#[derive(Debug, Clone)]
pub struct Traps {
    /// `None`: default. `Some("")`: ignore. Otherwise the command text.
    actions: Vec<Option<String>>,
    /// Signals the shell itself catches or ignores, independent of traps.
    interactive: bool,
    monitor: bool,
}

impl Default for Traps {
    fn default() -> Self {
        Self {
            actions: vec![None; NSIG + 1],
            interactive: false,
            monitor: false,
        }
    }
}

impl Traps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, slot: usize) -> Option<&str> {
        self.actions.get(slot).and_then(|a| a.as_deref())
    }

    /// Sets a trap and updates the OS disposition of real signals.
    pub fn set(&mut self, slot: usize, action: Option<String>) -> Result<(), ShellError> {
        if slot > NSIG {
            return Err(ShellError::builtin("trap", format!("{}: bad trap", slot)));
        }
        if slot == libc::SIGKILL as usize || slot == libc::SIGSTOP as usize {
            return Err(ShellError::builtin("trap", format!("{}: bad trap", signal_name(slot as i32))));
        }
        self.actions[slot] = action;
        if slot != EXIT_TRAP && slot != ERR_TRAP {
            self.apply(slot as i32);
        }
        Ok(())
    }

    /// The disposition the shell wants for `sig` given its traps and mode.
    fn wanted(&self, sig: i32) -> Disposition {
        match self.get(sig as usize) {
            Some("") => return Disposition::Ignore,
            Some(_) => return Disposition::Catch,
            None => {}
        }
        match sig {
            libc::SIGINT if self.interactive => Disposition::Catch,
            libc::SIGQUIT | libc::SIGTERM if self.interactive => Disposition::Ignore,
            libc::SIGTSTP | libc::SIGTTIN | libc::SIGTTOU if self.monitor => Disposition::Ignore,
            _ => Disposition::Default,
        }
    }

    fn apply(&self, sig: i32) {
        set_disposition(sig, self.wanted(sig));
    }

    /// Re-applies the shell's own dispositions after `-i` or `-m` changes.
    pub fn set_mode(&mut self, interactive: bool, monitor: bool) {
        self.interactive = interactive;
        self.monitor = monitor;
        for sig in [
            libc::SIGINT,
            libc::SIGQUIT,
            libc::SIGTERM,
            libc::SIGTSTP,
            libc::SIGTTIN,
            libc::SIGTTOU,
        ] {
            self.apply(sig);
        }
    }

    /// Records the mode a rebuilt child's parent was in, without touching
    /// dispositions, so [`reset_for_subshell`](Self::reset_for_subshell)
    /// undoes the inherited ones.
    pub fn mark_owned(&mut self, interactive: bool, monitor: bool) {
        self.interactive = interactive;
        self.monitor = monitor;
    }

    /// Subshell rule: caught signals revert to default, ignored ones stay
    /// ignored, and the shell's own handling is dropped.
    pub fn reset_for_subshell(&mut self) {
        let owned = self.interactive || self.monitor;
        self.interactive = false;
        self.monitor = false;
        for slot in 1..NSIG {
            if matches!(self.actions[slot].as_deref(), Some(a) if !a.is_empty()) {
                self.actions[slot] = None;
                self.apply(slot as i32);
            }
        }
        if owned {
            for sig in [
                libc::SIGINT,
                libc::SIGQUIT,
                libc::SIGTERM,
                libc::SIGTSTP,
                libc::SIGTTIN,
                libc::SIGTTOU,
            ] {
                self.apply(sig);
            }
        }
        self.actions[EXIT_TRAP] = None;
        self.actions[ERR_TRAP] = None;
    }

    /// Signals an asynchronous command ignores when job control is off.
    pub fn ignore_for_background() {
        set_disposition(libc::SIGINT, Disposition::Ignore);
        set_disposition(libc::SIGQUIT, Disposition::Ignore);
    }

    /// `(slot, action)` pairs for every set trap.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.actions
            .iter()
            .enumerate()
            .filter_map(|(i, a)| a.as_deref().map(|a| (i, a)))
    }

    /// Installs every trap from `(slot, action)` pairs, as in a rebuilt child.
    pub fn restore(&mut self, entries: &[(usize, String)]) {
        for (slot, action) in entries {
            if *slot <= NSIG {
                self.actions[*slot] = Some(action.clone());
            }
        }
    }
}

/// Display name of a trap slot.
pub fn slot_name(slot: usize) -> String {
    match slot {
        EXIT_TRAP => "EXIT".to_string(),
        ERR_TRAP => "ERR".to_string(),
        n => signal_name(n as i32),
    }
}
