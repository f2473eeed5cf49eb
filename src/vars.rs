use std::collections::HashMap;

use crate::types::ShellError;
use crate::utils::shell_quote;

/// Variables whose value is computed on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dynamic {
    Random,
    LineNo,
    FuncName,
    Seconds,
}

/// Side effect run after a variable is assigned or unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    Path,
    Random,
    OptInd,
    Mail,
    HistSize,
    Seconds,
}

/// Where the current value came from. Defaults never replace a value
/// imported from the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    Default,
    Environment,
    Shell,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Var {
    /// `None` for a declared but unset variable (`export X`, `local X`).
    pub value: Option<String>,
    pub exported: bool,
    pub readonly: bool,
    pub dynamic: Option<Dynamic>,
    pub hook: Option<Hook>,
    pub origin: Origin,
}

impl Var {
    pub fn new(value: Option<String>) -> Self {
        Self {
            value,
            exported: false,
            readonly: false,
            dynamic: None,
            hook: None,
            origin: Origin::Shell,
        }
    }
}

pub fn hook_for(name: &str) -> Option<Hook> {
    match name {
        "PATH" => Some(Hook::Path),
        "RANDOM" => Some(Hook::Random),
        "OPTIND" => Some(Hook::OptInd),
        "MAIL" | "MAILPATH" | "MAILCHECK" => Some(Hook::Mail),
        "HISTSIZE" => Some(Hook::HistSize),
        "SECONDS" => Some(Hook::Seconds),
        _ => None,
    }
}

/// Saved state of one function call's `local` declarations.
#[derive(Debug, Default, Clone)]
struct LocalFrame {
    /// Previous entry for each name made local, restored on return.
    saved: Vec<(String, Option<Var>)>,
    /// Option letters saved by `local -`.
    options: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct VarTable {
    vars: HashMap<String, Var>,
    frames: Vec<LocalFrame>,
}

impl VarTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.vars.get(name)
    }

    /// The stored value, ignoring dynamic variables.
    pub fn value(&self, name: &str) -> Option<&str> {
        self.vars.get(name).and_then(|v| v.value.as_deref())
    }

    pub fn is_set(&self, name: &str) -> bool {
        self.value(name).is_some()
    }

    /// Assigns `value`, returning the variable's hook for the caller to run.
    pub fn set(&mut self, name: &str, value: &str, export: bool) -> Result<Option<Hook>, ShellError> {
        self.set_with(name, Some(value.to_string()), export, Origin::Shell)
    }

    fn set_with(
        &mut self,
        name: &str,
        value: Option<String>,
        export: bool,
        origin: Origin,
    ) -> Result<Option<Hook>, ShellError> {
        match self.vars.get_mut(name) {
            Some(var) => {
                if var.readonly {
                    return Err(ShellError::Readonly(name.to_string()));
                }
                if value.is_some() {
                    var.value = value;
                }
                var.exported |= export;
                var.origin = origin;
                Ok(var.hook)
            }
            None => {
                let mut var = Var::new(value);
                var.exported = export;
                var.origin = origin;
                var.hook = hook_for(name);
                let hook = var.hook;
                self.vars.insert(name.to_string(), var);
                Ok(hook)
            }
        }
    }

    /// Imports a variable from the process environment.
    pub fn import(&mut self, name: &str, value: &str) {
        let _ = self.set_with(name, Some(value.to_string()), true, Origin::Environment);
    }

    /// Sets `value` only when the variable has no value yet.
    pub fn set_default(&mut self, name: &str, value: &str) {
        if !self.is_set(name) {
            let _ = self.set_with(name, Some(value.to_string()), false, Origin::Default);
        }
    }

    pub fn set_dynamic(&mut self, name: &str, dynamic: Dynamic) {
        let var = self
            .vars
            .entry(name.to_string())
            .or_insert_with(|| Var::new(None));
        var.dynamic = Some(dynamic);
        var.hook = hook_for(name);
    }

    pub fn unset(&mut self, name: &str) -> Result<Option<Hook>, ShellError> {
        match self.vars.get(name) {
            Some(var) if var.readonly => Err(ShellError::Readonly(name.to_string())),
            Some(var) => {
                let hook = var.hook;
                self.vars.remove(name);
                Ok(hook)
            }
            None => Ok(None),
        }
    }

    /// Marks a variable exported, optionally assigning it first.
    pub fn export(&mut self, name: &str, value: Option<&str>) -> Result<Option<Hook>, ShellError> {
        self.set_with(name, value.map(str::to_string), true, Origin::Shell)
    }

    pub fn unexport(&mut self, name: &str) {
        if let Some(var) = self.vars.get_mut(name) {
            var.exported = false;
        }
    }

    pub fn set_readonly(&mut self, name: &str, value: Option<&str>) -> Result<Option<Hook>, ShellError> {
        let hook = self.set_with(name, value.map(str::to_string), false, Origin::Shell)?;
        if let Some(var) = self.vars.get_mut(name) {
            var.readonly = true;
        }
        Ok(hook)
    }

    /// Inserts an entry as-is, used when rebuilding state in a child.
    pub fn insert_raw(&mut self, name: String, var: Var) {
        self.vars.insert(name, var);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Var)> {
        self.vars.iter()
    }

    /// Names in sorted order, for listings.
    pub fn sorted_names(&self) -> Vec<&String> {
        let mut names: Vec<&String> = self.vars.keys().collect();
        names.sort();
        names
    }

    /// `NAME=value` pairs passed to executed programs.
    pub fn environ(&self) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .vars
            .iter()
            .filter(|(_, v)| v.exported)
            .filter_map(|(k, v)| v.value.as_ref().map(|val| (k.clone(), val.clone())))
            .collect();
        env.sort();
        env
    }

    pub fn push_frame(&mut self) {
        self.frames.push(LocalFrame::default());
    }

    /// Number of active function frames.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Discards the innermost frame, restoring every variable made local in it.
    /// Returns the option letters saved by `local -`, if any.
    pub fn pop_frame(&mut self) -> (Vec<Hook>, Option<String>) {
        let mut hooks = Vec::new();
        let Some(frame) = self.frames.pop() else {
            return (hooks, None);
        };
        for (name, saved) in frame.saved.into_iter().rev() {
            if let Some(h) = hook_for(&name) {
                hooks.push(h);
            }
            match saved {
                Some(var) => {
                    self.vars.insert(name, var);
                }
                None => {
                    self.vars.remove(&name);
                }
            }
        }
        (hooks, frame.options)
    }

    /// Makes `name` local to the innermost function frame. The variable
    /// keeps its current value and flags unless `value` is given.
    pub fn make_local(&mut self, name: &str, value: Option<&str>) -> Result<Option<Hook>, ShellError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(ShellError::builtin("local", "not in a function"));
        };
        if !frame.saved.iter().any(|(n, _)| n == name) {
            frame.saved.push((name.to_string(), self.vars.get(name).cloned()));
        }
        match value {
            Some(v) => self.set(name, v, false),
            None => {
                self.vars
                    .entry(name.to_string())
                    .or_insert_with(|| Var::new(None));
                Ok(None)
            }
        }
    }

    /// `local -`: remember the option letters to restore on return.
    pub fn save_options(&mut self, letters: String) -> Result<(), ShellError> {
        let Some(frame) = self.frames.last_mut() else {
            return Err(ShellError::builtin("local", "not in a function"));
        };
        if frame.options.is_none() {
            frame.options = Some(letters);
        }
        Ok(())
    }

    /// Lines that recreate the exported (or readonly) variables.
    pub fn listing(&self, prefix: &str, filter: impl Fn(&Var) -> bool) -> Vec<String> {
        self.sorted_names()
            .into_iter()
            .filter_map(|name| {
                let var = &self.vars[name];
                if !filter(var) {
                    return None;
                }
                Some(match &var.value {
                    Some(v) => format!("{} {}={}", prefix, name, shell_quote(v)),
                    None => format!("{} {}", prefix, name),
                })
            })
            .collect()
    }
}
