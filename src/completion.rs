use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use rustyline::{
    completion::Completer as RustylineCompleter,
    completion::Pair,
    highlight::Highlighter,
    hint::Hinter,
    validate::Validator,
    Context,
    Helper,
    Result,
};

/// Executable file names found in the directories of a `PATH` value.
pub fn path_commands(path: &str) -> Vec<String> {
    let mut commands = Vec::new();
    for dir in path.split(':').filter(|d| !d.is_empty()) {
        let Ok(entries) = fs::read_dir(dir) else { continue };
        for entry in entries.filter_map(|r| r.ok()) {
            let Ok(metadata) = entry.metadata() else { continue };
            if metadata.is_file() && metadata.permissions().mode() & 0o111 != 0 {
                if let Some(name) = entry.file_name().to_str() {
                    commands.push(name.to_string());
                }
            }
        }
    }
    commands
}

/// Tab completion: command names in command position, file names
/// elsewhere. The command list is refreshed by the shell before each
/// prompt.
pub struct Completer {
    commands: Rc<RefCell<Vec<String>>>,
}

impl Completer {
    pub fn new(commands: Rc<RefCell<Vec<String>>>) -> Self {
        Self { commands }
    }

    pub fn complete(&self, line: &str, word: &str) -> Vec<String> {
        if is_command_position(line) && !word.contains('/') {
            self.complete_command(word)
        } else {
            complete_path(word)
        }
    }

    fn complete_command(&self, prefix: &str) -> Vec<String> {
        self.commands
            .borrow()
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .cloned()
            .collect()
    }
}

/// True when the text before the word being completed ends a command:
/// nothing, or an operator like `|`, `;` or `&&`.
fn is_command_position(before: &str) -> bool {
    let trimmed = before.trim_end();
    trimmed.is_empty() || trimmed.ends_with(['|', ';', '&', '(', '{', '`']) || trimmed.ends_with("$(")
}

fn complete_path(prefix: &str) -> Vec<String> {
    let (dir, shown, stem) = match prefix.rfind('/') {
        Some(i) => {
            let dir = if i == 0 { "/" } else { &prefix[..i] };
            (PathBuf::from(dir), &prefix[..=i], &prefix[i + 1..])
        }
        None => (PathBuf::from("."), "", prefix),
    };
    let mut completions = Vec::new();
    if let Ok(entries) = fs::read_dir(&dir) {
        for entry in entries.filter_map(|r| r.ok()) {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
            if !name.starts_with(stem) || (name.starts_with('.') && !stem.starts_with('.')) {
                continue;
            }
            let mut candidate = format!("{}{}", shown, name);
            if Path::new(&dir).join(&name).is_dir() {
                candidate.push('/');
            }
            completions.push(candidate);
        }
    }
    completions.sort();
    completions
}

impl Helper for Completer {}

impl RustylineCompleter for Completer {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>)> {
        let start = line[..pos].rfind(char::is_whitespace).map_or(0, |i| i + 1);
        let pairs = self
            .complete(&line[..start], &line[start..pos])
            .into_iter()
            .map(|s| Pair {
                display: s.clone(),
                replacement: s,
            })
            .collect();
        Ok((start, pairs))
    }
}

impl Highlighter for Completer {}
impl Hinter for Completer {
    type Hint = String;
}
impl Validator for Completer {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_position() {
        assert!(is_command_position(""));
        assert!(is_command_position("ls | "));
        assert!(is_command_position("true && "));
        assert!(!is_command_position("ls "));
    }

    #[test]
    fn test_complete_names_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("alpha.txt"), "").unwrap();
        fs::create_dir(dir.path().join("albums")).unwrap();
        let prefix = format!("{}/al", dir.path().display());
        let completer = Completer::new(Rc::new(RefCell::new(vec!["echo".into(), "export".into(), "ls".into()])));
        assert_eq!(completer.complete("", "e"), vec!["echo", "export"]);
        assert_eq!(
            completer.complete("cat ", &prefix),
            vec![format!("{}/albums/", dir.path().display()), format!("{}/alpha.txt", dir.path().display())]
        );
    }
}
