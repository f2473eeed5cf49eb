//! "You have mail" checks before interactive prompts.

use std::collections::HashMap;
use std::fs;
use std::time::{Duration, Instant};

const DEFAULT_MESSAGE: &str = "you have mail";
/// Default seconds between checks when `MAILCHECK` is unset.
pub const DEFAULT_INTERVAL: u64 = 60;

#[derive(Debug, Default, Clone)]
pub struct MailState {
    sizes: HashMap<String, u64>,
    last_check: Option<Instant>,
}

/// A mailbox to watch and the message to show when it grows.
fn mailboxes(mailpath: Option<&str>, mail: Option<&str>) -> Vec<(String, String)> {
    match mailpath {
        Some(mp) if !mp.is_empty() => mp
            .split(':')
            .filter(|e| !e.is_empty())
            .map(|entry| match entry.split_once('%') {
                Some((path, msg)) => (path.to_string(), msg.to_string()),
                None => (entry.to_string(), DEFAULT_MESSAGE.to_string()),
            })
            .collect(),
        _ => mail
            .filter(|m| !m.is_empty())
            .map(|m| vec![(m.to_string(), DEFAULT_MESSAGE.to_string())])
            .unwrap_or_default(),
    }
}

impl MailState {
    /// Forgets recorded sizes after `MAIL`/`MAILPATH` change.
    pub fn reset(&mut self) {
        self.sizes.clear();
        self.last_check = None;
    }

    /// Returns the messages for mailboxes that grew since the last check,
    /// at most once per `interval`.
    pub fn check(&mut self, mailpath: Option<&str>, mail: Option<&str>, interval: u64) -> Vec<String> {
        let now = Instant::now();
        if let Some(last) = self.last_check {
            if now.duration_since(last) < Duration::from_secs(interval) {
                return Vec::new();
            }
        }
        let first = self.last_check.is_none();
        self.last_check = Some(now);
        let mut messages = Vec::new();
        for (path, message) in mailboxes(mailpath, mail) {
            let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let old = self.sizes.insert(path, size);
            if !first && size > old.unwrap_or(0) {
                messages.push(message);
            }
        }
        messages
    }
}
