//! Scratch buffer for word expansion.
//!
//! Expanded text is accumulated as cells that remember whether each
//! character came from a quoted context and whether it is subject to field
//! splitting. Callers take a [`Mark`], build, and then either keep the new
//! cells or [`rewind`](ExpandBuf::rewind) to drop them.

/// The character came from a quoted context: never split or globbed.
pub const QUOTED: u8 = 1;
/// The character came from an unquoted expansion: IFS characters split.
pub const SPLIT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    Char(char, u8),
    /// Zero-width: a quoted (possibly empty) span was present, so the field
    /// exists even if it has no characters.
    Mark,
    /// Zero-width hard field boundary (between `"$@"` elements).
    Break,
    /// Zero-width soft boundary, split like IFS white space (between
    /// unquoted `$@` elements).
    Sep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Mark(usize);

#[derive(Debug, Default, Clone)]
pub struct ExpandBuf {
    cells: Vec<Cell>,
}

impl ExpandBuf {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> Mark {
        Mark(self.cells.len())
    }

    /// Drops everything built since `mark`.
    pub fn rewind(&mut self, mark: Mark) {
        self.cells.truncate(mark.0);
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn push_str(&mut self, s: &str, flags: u8) {
        self.cells.extend(s.chars().map(|c| Cell::Char(c, flags)));
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn since(&self, mark: Mark) -> &[Cell] {
        &self.cells[mark.0..]
    }

    /// Plain text of the cells since `mark`.
    pub fn text_since(&self, mark: Mark) -> String {
        text_of(self.since(mark))
    }

    /// The cells since `mark` as a pattern: quoted characters are escaped,
    /// unquoted ones keep their pattern meaning.
    pub fn pattern_since(&self, mark: Mark) -> String {
        pattern_of(self.since(mark))
    }

    /// Removes and returns the cells since `mark`.
    pub fn take_since(&mut self, mark: Mark) -> Vec<Cell> {
        self.cells.split_off(mark.0)
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }
}

pub fn text_of(cells: &[Cell]) -> String {
    cells
        .iter()
        .filter_map(|c| match c {
            Cell::Char(ch, _) => Some(*ch),
            _ => None,
        })
        .collect()
}

pub fn pattern_of(cells: &[Cell]) -> String {
    let mut out = String::new();
    for cell in cells {
        if let Cell::Char(c, flags) = cell {
            if flags & QUOTED != 0 && matches!(c, '*' | '?' | '[' | ']' | '\\') {
                out.push('\\');
            }
            out.push(*c);
        }
    }
    out
}

/// True when an unquoted pattern character is present.
pub fn has_glob_meta(cells: &[Cell]) -> bool {
    cells
        .iter()
        .any(|c| matches!(c, Cell::Char('*' | '?' | '[', flags) if flags & QUOTED == 0))
}

/// IFS character classes.
pub struct Ifs {
    chars: Vec<char>,
}

impl Ifs {
    pub fn new(ifs: Option<&str>) -> Self {
        Self {
            chars: ifs.unwrap_or(" \t\n").chars().collect(),
        }
    }

    fn contains(&self, c: char) -> bool {
        self.chars.contains(&c)
    }

    fn is_white(&self, c: char) -> bool {
        matches!(c, ' ' | '\t' | '\n') && self.contains(c)
    }

    /// The separator used to join `$*` (and `$@` outside splitting).
    pub fn joiner(&self) -> Option<char> {
        self.chars.first().copied()
    }
}

/// Splits expanded cells into fields.
///
/// White-space IFS characters at the edges are absorbed, runs of them
/// count as one separator, and each non-white-space IFS character always
/// delimits a field (so `a::b` yields an empty middle field).
pub fn split_fields(cells: &[Cell], ifs: &Ifs) -> Vec<Vec<Cell>> {
    let splits = |c: &Cell| match c {
        Cell::Char(ch, flags) => flags & SPLIT != 0 && ifs.contains(*ch),
        Cell::Sep => true,
        _ => false,
    };
    let white = |c: &Cell| match c {
        Cell::Char(ch, _) => ifs.is_white(*ch),
        Cell::Sep => true,
        _ => false,
    };

    let mut fields = Vec::new();
    let mut cur = Vec::new();
    let mut has = false;
    let mut i = 0;
    while i < cells.len() {
        let cell = cells[i];
        if cell == Cell::Break {
            fields.push(std::mem::take(&mut cur));
            has = false;
            i += 1;
            continue;
        }
        if splits(&cell) {
            let mut j = i;
            while j < cells.len() && splits(&cells[j]) && white(&cells[j]) {
                j += 1;
            }
            let mut hard = false;
            if j < cells.len() && splits(&cells[j]) && !white(&cells[j]) {
                hard = true;
                j += 1;
                while j < cells.len() && splits(&cells[j]) && white(&cells[j]) {
                    j += 1;
                }
            }
            if has || hard {
                fields.push(std::mem::take(&mut cur));
            }
            has = false;
            i = j;
            continue;
        }
        cur.push(cell);
        has = true;
        i += 1;
    }
    if has {
        fields.push(cur);
    }
    fields
}
