use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::os::fd::RawFd;
use std::time::Duration;

/// Which prompt the next line request should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Primary,
    Secondary,
}

/// A provider of input lines. Interactive input prompts; files and
/// strings do not.
pub trait LineSource {
    /// Next line including its trailing newline, `None` at end of input.
    fn read_line(&mut self, prompt: Prompt) -> io::Result<Option<String>>;

    /// Prompt strings for the next reads; ignored by non-interactive sources.
    fn set_prompts(&mut self, _ps1: &str, _ps2: &str) {}

    /// Read timeout for the primary prompt (`TMOUT`).
    fn set_timeout(&mut self, _timeout: Option<Duration>) {}

    /// Switches line editing between vi and emacs key bindings.
    fn set_edit_mode(&mut self, _vi: bool) {}

    fn is_interactive(&self) -> bool {
        false
    }
}

/// Lines of an in-memory string (`-c`, `eval`, backquotes, aliases).
pub struct StringSource {
    text: String,
    pos: usize,
}

impl StringSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            pos: 0,
        }
    }
}

impl LineSource for StringSource {
    fn read_line(&mut self, _prompt: Prompt) -> io::Result<Option<String>> {
        if self.pos >= self.text.len() {
            return Ok(None);
        }
        let rest = &self.text[self.pos..];
        let end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let line = rest[..end].to_string();
        self.pos += end;
        Ok(Some(line))
    }
}

/// Lines of a script file, buffered.
pub struct FileSource {
    reader: BufReader<File>,
}

impl FileSource {
    pub fn new(file: File) -> Self {
        Self {
            reader: BufReader::new(file),
        }
    }
}

impl LineSource for FileSource {
    fn read_line(&mut self, _prompt: Prompt) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Lines read one byte at a time from a descriptor, so that commands
/// reading the same descriptor see exactly the unconsumed input.
pub struct FdSource {
    fd: RawFd,
}

impl FdSource {
    pub fn new(fd: RawFd) -> Self {
        Self { fd }
    }
}

impl LineSource for FdSource {
    fn read_line(&mut self, _prompt: Prompt) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match crate::sys::read(self.fd, &mut byte) {
                Ok(0) => break,
                Ok(_) => {
                    buf.push(byte[0]);
                    if byte[0] == b'\n' {
                        break;
                    }
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }
}

/// Text pushed on top of the input, such as an alias value.
struct Pushed {
    chars: Vec<char>,
    pos: usize,
}

/// Character source for the word reader.
///
/// Holds at most two characters of pushback and a stack of pushed strings
/// that are read before the underlying line source.
pub struct Lexer {
    source: Box<dyn LineSource>,
    line_buf: Vec<char>,
    pos: usize,
    strings: Vec<Pushed>,
    pushback: [char; 2],
    npushback: usize,
    prompt: Prompt,
    eof: bool,
    /// Line number of the last character returned from the source.
    pub line: usize,
    pub name: Option<String>,
    /// Echo lines to stderr as they are read (`set -v`).
    pub verbose: bool,
    error: Option<io::Error>,
}

impl Lexer {
    pub fn new(source: Box<dyn LineSource>, name: Option<String>) -> Self {
        Self {
            source,
            line_buf: Vec::new(),
            pos: 0,
            strings: Vec::new(),
            pushback: ['\0'; 2],
            npushback: 0,
            prompt: Prompt::Primary,
            eof: false,
            line: 1,
            name,
            verbose: false,
            error: None,
        }
    }

    pub fn from_string(text: &str, name: Option<String>, line: usize) -> Self {
        let mut lexer = Lexer::new(Box::new(StringSource::new(text)), name);
        lexer.line = line;
        lexer
    }

    pub fn is_interactive(&self) -> bool {
        self.source.is_interactive()
    }

    pub fn set_prompts(&mut self, ps1: &str, ps2: &str) {
        self.source.set_prompts(ps1, ps2);
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.source.set_timeout(timeout);
    }

    pub fn set_edit_mode(&mut self, vi: bool) {
        self.source.set_edit_mode(vi);
    }

    /// Called before parsing a new complete command: the next line read
    /// uses the primary prompt.
    pub fn begin_command(&mut self) {
        self.prompt = Prompt::Primary;
    }

    /// Read error raised by the underlying source, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Allows reading again after the source reported an interrupted or
    /// failed read.
    pub fn clear_eof(&mut self) {
        self.eof = false;
        self.line_buf.clear();
        self.pos = 0;
    }

    fn fill(&mut self) -> bool {
        if self.eof {
            return false;
        }
        match self.source.read_line(self.prompt) {
            Ok(Some(line)) => {
                if self.verbose {
                    let _ = write!(io::stderr(), "{}", line);
                }
                self.line_buf = line.chars().collect();
                self.pos = 0;
                self.prompt = Prompt::Secondary;
                true
            }
            Ok(None) => {
                self.eof = true;
                false
            }
            Err(e) => {
                self.error = Some(e);
                self.eof = true;
                false
            }
        }
    }

    /// Next raw character, or `None` at end of input.
    pub fn next_char(&mut self) -> Option<char> {
        if self.npushback > 0 {
            self.npushback -= 1;
            let c = self.pushback[self.npushback];
            if c == '\n' && self.strings.is_empty() {
                self.line += 1;
            }
            return Some(c);
        }
        while let Some(top) = self.strings.last_mut() {
            if top.pos < top.chars.len() {
                let c = top.chars[top.pos];
                top.pos += 1;
                return Some(c);
            }
            self.strings.pop();
        }
        if self.pos >= self.line_buf.len() && !self.fill() {
            return None;
        }
        let c = self.line_buf[self.pos];
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Like [`next_char`](Self::next_char) but removes backslash-newline
    /// pairs. Used everywhere outside single quotes.
    pub fn next_char_bsnl(&mut self) -> Option<char> {
        loop {
            let c = self.next_char()?;
            if c != '\\' {
                return Some(c);
            }
            match self.next_char() {
                Some('\n') => continue,
                Some(other) => {
                    self.unget(other);
                    return Some('\\');
                }
                None => return Some('\\'),
            }
        }
    }

    /// Pushes a character back. At most two characters may be pending.
    pub fn unget(&mut self, c: char) {
        assert!(self.npushback < 2, "lexer pushback overflow");
        if c == '\n' && self.strings.is_empty() {
            self.line -= 1;
        }
        self.pushback[self.npushback] = c;
        self.npushback += 1;
    }

    pub fn peek_char(&mut self) -> Option<char> {
        let c = self.next_char()?;
        self.unget(c);
        Some(c)
    }

    pub fn peek_char_bsnl(&mut self) -> Option<char> {
        let c = self.next_char_bsnl()?;
        self.unget(c);
        Some(c)
    }

    /// Pushes `text` to be read before the rest of the input.
    pub fn push_string(&mut self, text: &str) {
        // Pending pushback belongs after the pushed text.
        let mut chars: Vec<char> = text.chars().collect();
        while self.npushback > 0 {
            self.npushback -= 1;
            let c = self.pushback[self.npushback];
            if c == '\n' && self.strings.is_empty() {
                self.line += 1;
            }
            chars.push(c);
        }
        self.strings.push(Pushed { chars, pos: 0 });
    }

    /// True when nothing but blanks is left of the pushed text, so the
    /// next word comes from the input proper.
    pub fn pushed_text_blank(&self) -> bool {
        self.strings
            .iter()
            .all(|s| s.chars[s.pos..].iter().all(|c| matches!(c, ' ' | '\t')))
    }

    /// Reads one raw line (without its newline) for a here-document body.
    /// Returns `None` at end of input.
    pub fn read_raw_line(&mut self) -> Option<String> {
        let mut line = String::new();
        loop {
            match self.next_char() {
                Some('\n') => return Some(line),
                Some(c) => line.push(c),
                None => {
                    if line.is_empty() {
                        return None;
                    }
                    return Some(line);
                }
            }
        }
    }

    /// Skips the rest of the current line, used to recover from a syntax
    /// error in interactive mode.
    pub fn discard_line(&mut self) {
        self.npushback = 0;
        self.strings.clear();
        self.pos = self.line_buf.len();
    }
}
