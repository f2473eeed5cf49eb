//! Shell pattern matching (`case`, `[[ == ]]`, `${var#pattern}`, pathname
//! components).
//!
//! Patterns arrive with quoted characters backslash-escaped: `\*` is a
//! literal star, `*` matches any string.
//!
//! Matching steps the set of live pattern positions over the subject one
//! character at a time, so it never backtracks.

#[derive(Debug, Clone, PartialEq)]
enum ClassItem {
    Char(char),
    Range(char, char),
    Named(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Elem {
    Char(char),
    Any,
    Star,
    Class { negated: bool, items: Vec<ClassItem> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    elems: Vec<Elem>,
}

fn named_class(name: &str, c: char) -> bool {
    match name {
        "alnum" => c.is_alphanumeric(),
        "alpha" => c.is_alphabetic(),
        "blank" => c == ' ' || c == '\t',
        "cntrl" => c.is_control(),
        "digit" => c.is_ascii_digit(),
        "graph" => !c.is_control() && !c.is_whitespace(),
        "lower" => c.is_lowercase(),
        "print" => !c.is_control(),
        "punct" => c.is_ascii_punctuation(),
        "space" => c.is_whitespace(),
        "upper" => c.is_uppercase(),
        "xdigit" => c.is_ascii_hexdigit(),
        _ => false,
    }
}

/// Parses a bracket expression starting after `[`. Returns the element and
/// the index just past the closing `]`, or `None` if it is unterminated.
fn parse_class(chars: &[char], start: usize) -> Option<(Elem, usize)> {
    let mut i = start;
    let mut negated = false;
    if i < chars.len() && (chars[i] == '!' || chars[i] == '^') {
        negated = true;
        i += 1;
    }
    let first = i;
    let mut items = Vec::new();
    loop {
        let c = *chars.get(i)?;
        if c == ']' && i > first {
            return Some((Elem::Class { negated, items }, i + 1));
        }
        if c == '[' && chars.get(i + 1) == Some(&':') {
            let rest = &chars[i + 2..];
            if let Some(end) = rest.windows(2).position(|w| w == [':', ']']) {
                items.push(ClassItem::Named(rest[..end].iter().collect()));
                i += end + 4;
                continue;
            }
        }
        let lo = if c == '\\' && i + 1 < chars.len() {
            i += 1;
            chars[i]
        } else {
            c
        };
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).map_or(false, |&n| n != ']') {
            let mut j = i + 2;
            if chars[j] == '\\' && j + 1 < chars.len() {
                j += 1;
            }
            items.push(ClassItem::Range(lo, chars[j]));
            i = j + 1;
        } else {
            items.push(ClassItem::Char(lo));
            i += 1;
        }
    }
}

impl Pattern {
    pub fn new(pattern: &str) -> Self {
        let chars: Vec<char> = pattern.chars().collect();
        let mut elems = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '\\' if i + 1 < chars.len() => {
                    elems.push(Elem::Char(chars[i + 1]));
                    i += 2;
                }
                '*' => {
                    if elems.last() != Some(&Elem::Star) {
                        elems.push(Elem::Star);
                    }
                    i += 1;
                }
                '?' => {
                    elems.push(Elem::Any);
                    i += 1;
                }
                '[' => match parse_class(&chars, i + 1) {
                    Some((elem, next)) => {
                        elems.push(elem);
                        i = next;
                    }
                    None => {
                        elems.push(Elem::Char('['));
                        i += 1;
                    }
                },
                c => {
                    elems.push(Elem::Char(c));
                    i += 1;
                }
            }
        }
        Self { elems }
    }

    /// True when the first element is a literal `.`.
    pub fn starts_with_dot(&self) -> bool {
        self.elems.first() == Some(&Elem::Char('.'))
    }

    pub fn matches(&self, text: &str) -> bool {
        let chars: Vec<char> = text.chars().collect();
        self.matches_chars(&chars)
    }

    fn matches_chars(&self, text: &[char]) -> bool {
        let mut full = false;
        self.scan_prefixes(text, |n| full = n == text.len());
        full
    }

    fn elem_matches(elem: &Elem, c: char) -> bool {
        match elem {
            Elem::Char(p) => *p == c,
            Elem::Any | Elem::Star => true,
            Elem::Class { negated, items } => {
                let hit = items.iter().any(|item| match item {
                    ClassItem::Char(p) => *p == c,
                    ClassItem::Range(lo, hi) => *lo <= c && c <= *hi,
                    ClassItem::Named(name) => named_class(name, c),
                });
                hit != *negated
            }
        }
    }

    /// The position `pi` moves to on `c`, if any. A star loops on itself.
    fn step(&self, pi: usize, c: char) -> Option<usize> {
        match &self.elems[pi] {
            Elem::Star => Some(pi),
            elem if Self::elem_matches(elem, c) => Some(pi + 1),
            _ => None,
        }
    }

    /// Adds the positions reachable by letting stars match nothing.
    fn close<T: Copy + Ord>(&self, live: &mut [Option<T>]) {
        for pi in 0..self.elems.len() {
            if let (Elem::Star, Some(v)) = (&self.elems[pi], live[pi]) {
                live[pi + 1] = Some(live[pi + 1].map_or(v, |w| w.min(v)));
            }
        }
    }

    /// Calls `on_match` with each prefix length of `text` the whole pattern
    /// matches, shortest first.
    fn scan_prefixes(&self, text: &[char], mut on_match: impl FnMut(usize)) {
        let end = self.elems.len();
        let mut live = vec![None; end + 1];
        live[0] = Some(());
        self.close(&mut live);
        for (i, &c) in text.iter().enumerate() {
            if live[end].is_some() {
                on_match(i);
            }
            let mut next = vec![None; end + 1];
            for pi in (0..end).filter(|&pi| live[pi].is_some()) {
                if let Some(to) = self.step(pi, c) {
                    next[to] = Some(());
                }
            }
            if next.iter().all(Option::is_none) {
                return;
            }
            self.close(&mut next);
            live = next;
        }
        if live[end].is_some() {
            on_match(text.len());
        }
    }

    /// The same pattern read back to front.
    fn reversed(&self) -> Pattern {
        Pattern {
            elems: self.elems.iter().rev().cloned().collect(),
        }
    }

    /// Length in chars of the shortest or longest prefix of `text` matched.
    pub fn match_prefix(&self, text: &str, longest: bool) -> Option<usize> {
        let chars: Vec<char> = text.chars().collect();
        let mut found = None;
        self.scan_prefixes(&chars, |n| {
            if longest || found.is_none() {
                found = Some(n);
            }
        });
        found
    }

    /// Length in chars of the shortest or longest suffix of `text` matched.
    pub fn match_suffix(&self, text: &str, longest: bool) -> Option<usize> {
        self.reversed().match_prefix(&text.chars().rev().collect::<String>(), longest)
    }

    /// First (leftmost, then longest) non-empty match at or after char
    /// index `from`, as a char range.
    ///
    /// Each live position remembers the earliest start that reaches it.
    /// Once a match is known, later starts are no longer fed in and threads
    /// that began after it are dropped.
    pub fn find(&self, chars: &[char], from: usize) -> Option<(usize, usize)> {
        let end = self.elems.len();
        let mut live: Vec<Option<usize>> = vec![None; end + 1];
        let mut best: Option<(usize, usize)> = None;
        for i in from..=chars.len() {
            if i > from {
                let mut next = vec![None; end + 1];
                for pi in 0..end {
                    let (Some(start), Some(to)) = (live[pi], self.step(pi, chars[i - 1])) else {
                        continue;
                    };
                    next[to] = Some(next[to].map_or(start, |s: usize| s.min(start)));
                }
                self.close(&mut next);
                live = next;
                if let Some(start) = live[end] {
                    if best.map_or(true, |(s, _)| start <= s) {
                        best = Some((start, i));
                    }
                }
            }
            match best {
                Some((first, _)) => {
                    for slot in live.iter_mut().filter(|slot| slot.map_or(false, |s| s > first)) {
                        *slot = None;
                    }
                    if live.iter().all(Option::is_none) {
                        break;
                    }
                }
                None if i < chars.len() => {
                    live[0] = Some(live[0].map_or(i, |s| s.min(i)));
                    self.close(&mut live);
                }
                None => {}
            }
        }
        best
    }

    pub fn matches_slice(&self, chars: &[char]) -> bool {
        self.matches_chars(chars)
    }
}

/// Matches `text` against the pattern string.
pub fn fnmatch(pattern: &str, text: &str) -> bool {
    Pattern::new(pattern).matches(text)
}

/// True when the pattern has an unescaped `*`, `?` or `[`.
pub fn has_meta(pattern: &str) -> bool {
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' => return true,
            _ => {}
        }
    }
    false
}

/// Removes the escaping backslashes from a pattern.
pub fn unescape(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(n) = chars.next() {
                out.push(n);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Escapes every pattern-significant character in `s`.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
