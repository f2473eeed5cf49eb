use std::fs;
use std::io::Write;
use std::path::Path;

/// Default number of entries kept when `HISTSIZE` is unset.
pub const DEFAULT_HISTSIZE: usize = 500;

/// Command-line history shared by the line editor and the `history`
/// builtin.
#[derive(Debug, Clone)]
pub struct History {
    entries: Vec<String>,
    max: usize,
    /// Entries ever appended.
    pushed: usize,
    /// Bumped whenever entries are removed or replaced.
    epoch: usize,
}

/// How far a copy of the history (the line editor's) has caught up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HistoryMark {
    epoch: usize,
    pushed: usize,
}

impl Default for History {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            max: DEFAULT_HISTSIZE,
            pushed: 0,
            epoch: 0,
        }
    }
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Adds a command line, skipping blanks and immediate repeats.
    pub fn add(&mut self, line: &str) {
        let line = line.trim_end_matches('\n');
        if line.trim().is_empty() || self.entries.last().map(String::as_str) == Some(line) {
            return;
        }
        self.entries.push(line.to_string());
        self.pushed += 1;
        self.trim();
    }

    /// Entries appended since `mark`, or `None` when the history was
    /// cleared or cut since then and has to be copied whole. Also returns
    /// the mark to pass next time.
    pub fn since(&self, mark: HistoryMark) -> (Option<&[String]>, HistoryMark) {
        let now = HistoryMark {
            epoch: self.epoch,
            pushed: self.pushed,
        };
        if mark.epoch != self.epoch {
            return (None, now);
        }
        let fresh = self.pushed.saturating_sub(mark.pushed).min(self.entries.len());
        (Some(&self.entries[self.entries.len() - fresh..]), now)
    }

    pub fn set_max(&mut self, max: usize) {
        self.max = max;
        if self.entries.len() > max {
            self.epoch += 1;
            self.trim();
        }
    }

    fn trim(&mut self) {
        if self.entries.len() > self.max {
            let excess = self.entries.len() - self.max;
            self.entries.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.epoch += 1;
    }

    pub fn restore(&mut self, entries: Vec<String>) {
        self.entries = entries;
        self.epoch += 1;
        self.trim();
    }

    pub fn load(&mut self, path: &Path) -> std::io::Result<()> {
        let text = fs::read_to_string(path)?;
        for line in text.lines() {
            self.add(line);
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let mut file = fs::File::create(path)?;
        for entry in &self.entries {
            writeln!(file, "{}", entry)?;
        }
        Ok(())
    }

    /// `history` builtin listing, numbered from 1. With `last`, only the
    /// final entries are shown.
    pub fn listing(&self, last: Option<usize>) -> Vec<String> {
        let start = last.map_or(0, |n| self.entries.len().saturating_sub(n));
        self.entries
            .iter()
            .enumerate()
            .skip(start)
            .map(|(i, e)| format!("{:5}  {}", i + 1, e))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_reports_only_new_lines() {
        let mut history = History::new();
        history.add("echo one\n");
        let (fresh, mark) = history.since(HistoryMark::default());
        assert_eq!(fresh, Some(&["echo one".to_string()][..]));

        history.add("echo two\n");
        history.add("echo two\n");
        history.add("   \n");
        let (fresh, mark) = history.since(mark);
        assert_eq!(fresh, Some(&["echo two".to_string()][..]));
        assert_eq!(history.since(mark).0, Some(&[][..]));

        history.clear();
        history.add("ls");
        let (fresh, _) = history.since(mark);
        assert_eq!(fresh, None);
    }

    #[test]
    fn test_shrinking_forces_a_full_copy() {
        let mut history = History::new();
        for i in 0..5 {
            history.add(&format!("cmd {}", i));
        }
        let (_, mark) = history.since(HistoryMark::default());
        history.set_max(10);
        assert_eq!(history.since(mark).0, Some(&[][..]));
        history.set_max(2);
        assert_eq!(history.since(mark).0, None);
        assert_eq!(history.entries(), ["cmd 3", "cmd 4"]);
    }
}
