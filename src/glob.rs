use std::fs;
use std::path::Path;

use crate::pattern::{has_meta, unescape, Pattern};

/// Expands a pathname pattern (quoted characters backslash-escaped) into
/// the sorted list of matching paths. An empty result means no match.
pub fn expand(pattern: &str) -> Vec<String> {
    let components = split_components(pattern);
    let (base, components) = match components.split_first() {
        Some((first, rest)) if first.is_empty() => ("/".to_string(), rest.to_vec()),
        _ => (String::new(), components),
    };
    let mut results = Vec::new();
    walk(&base, &components, &mut results);
    results.sort();
    results
}

/// Splits on unescaped `/`, keeping escapes inside each component.
fn split_components(pattern: &str) -> Vec<String> {
    let mut parts = vec![String::new()];
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                let last = parts.last_mut();
                if let Some(part) = last {
                    part.push('\\');
                    if let Some(n) = chars.next() {
                        part.push(n);
                    }
                }
            }
            '/' => parts.push(String::new()),
            c => {
                if let Some(part) = parts.last_mut() {
                    part.push(c);
                }
            }
        }
    }
    parts
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else if prefix.ends_with('/') {
        format!("{}{}", prefix, name)
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn walk(prefix: &str, components: &[String], out: &mut Vec<String>) {
    let Some((component, rest)) = components.split_first() else {
        if !prefix.is_empty() {
            out.push(prefix.to_string());
        }
        return;
    };

    // `a//b` and a trailing slash leave empty components.
    if component.is_empty() {
        if rest.is_empty() {
            if Path::new(prefix).is_dir() {
                out.push(format!("{}/", prefix.trim_end_matches('/')));
            }
        } else {
            walk(prefix, rest, out);
        }
        return;
    }

    if !has_meta(component) {
        let next = join(prefix, &unescape(component));
        if fs::symlink_metadata(&next).is_ok() {
            walk(&next, rest, out);
        }
        return;
    }

    let dir = if prefix.is_empty() { "." } else { prefix };
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let pattern = Pattern::new(component);
    let dot_ok = pattern.starts_with_dot();
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| dot_ok || !name.starts_with('.'))
        .filter(|name| pattern.matches(name))
        .collect();
    names.sort();
    for name in names {
        let next = join(prefix, &name);
        if rest.is_empty() || Path::new(&next).is_dir() {
            walk(&next, rest, out);
        }
    }
}
