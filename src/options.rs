use crate::types::ShellError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opt {
    AllExport,
    Notify,
    NoClobber,
    ErrExit,
    NoGlob,
    HashAll,
    Interactive,
    Monitor,
    NoExec,
    NoUnset,
    Verbose,
    XTrace,
    IgnoreEof,
    PipeFail,
    Vi,
    Emacs,
    Posix,
    Stdin,
}

/// Option table: flag letter (if any) and long name, in `set -o` order.
const OPTIONS: &[(Opt, Option<char>, &str)] = &[
    (Opt::AllExport, Some('a'), "allexport"),
    (Opt::Notify, Some('b'), "notify"),
    (Opt::NoClobber, Some('C'), "noclobber"),
    (Opt::ErrExit, Some('e'), "errexit"),
    (Opt::NoGlob, Some('f'), "noglob"),
    (Opt::HashAll, Some('h'), "hashall"),
    (Opt::Interactive, Some('i'), "interactive"),
    (Opt::Monitor, Some('m'), "monitor"),
    (Opt::NoExec, Some('n'), "noexec"),
    (Opt::NoUnset, Some('u'), "nounset"),
    (Opt::Verbose, Some('v'), "verbose"),
    (Opt::XTrace, Some('x'), "xtrace"),
    (Opt::IgnoreEof, None, "ignoreeof"),
    (Opt::PipeFail, None, "pipefail"),
    (Opt::Vi, None, "vi"),
    (Opt::Emacs, None, "emacs"),
    (Opt::Posix, None, "posix"),
    (Opt::Stdin, Some('s'), "stdin"),
];

fn index(opt: Opt) -> usize {
    OPTIONS.iter().position(|(o, _, _)| *o == opt).unwrap_or(0)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    flags: [bool; OPTIONS.len()],
}

impl Default for Options {
    fn default() -> Self {
        Self {
            flags: [false; OPTIONS.len()],
        }
    }
}

impl Options {
    pub fn get(&self, opt: Opt) -> bool {
        self.flags[index(opt)]
    }

    pub fn set(&mut self, opt: Opt, on: bool) {
        match opt {
            Opt::Vi if on => self.flags[index(Opt::Emacs)] = false,
            Opt::Emacs if on => self.flags[index(Opt::Vi)] = false,
            _ => {}
        }
        self.flags[index(opt)] = on;
    }

    pub fn by_letter(c: char) -> Option<Opt> {
        OPTIONS
            .iter()
            .find(|(_, l, _)| *l == Some(c))
            .map(|(o, _, _)| *o)
    }

    pub fn by_name(name: &str) -> Option<Opt> {
        OPTIONS.iter().find(|(_, _, n)| *n == name).map(|(o, _, _)| *o)
    }

    /// The value of `$-`.
    pub fn letters(&self) -> String {
        OPTIONS
            .iter()
            .filter(|(o, _, _)| self.get(*o))
            .filter_map(|(_, l, _)| *l)
            .collect()
    }

    /// Restores the letter options from a `$-` string saved earlier.
    pub fn restore_letters(&mut self, letters: &str) {
        for (opt, letter, _) in OPTIONS {
            if let Some(l) = letter {
                if *opt != Opt::Interactive && *opt != Opt::Stdin {
                    self.set(*opt, letters.contains(*l));
                }
            }
        }
    }

    /// `set -o` output.
    pub fn listing(&self) -> Vec<String> {
        OPTIONS
            .iter()
            .map(|(o, _, n)| format!("{:<16}{}", n, if self.get(*o) { "on" } else { "off" }))
            .collect()
    }

    /// `set +o` output: commands that restore the current settings.
    pub fn restore_commands(&self) -> Vec<String> {
        OPTIONS
            .iter()
            .filter(|(o, _, _)| !matches!(o, Opt::Interactive | Opt::Stdin))
            .map(|(o, _, n)| format!("set {}o {}", if self.get(*o) { '-' } else { '+' }, n))
            .collect()
    }

    /// Encoded as a bit set for transport to a child process.
    pub fn bits(&self) -> u32 {
        self.flags
            .iter()
            .enumerate()
            .fold(0, |acc, (i, on)| if *on { acc | (1 << i) } else { acc })
    }

    pub fn from_bits(bits: u32) -> Self {
        let mut opts = Options::default();
        for (i, flag) in opts.flags.iter_mut().enumerate() {
            *flag = bits & (1 << i) != 0;
        }
        opts
    }
}

/// What an option-argument scan found besides flag changes.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct OptionScan {
    /// Index of the first operand.
    pub next: usize,
    /// Letters from `extra` that were given, in order, with their sign.
    pub extras: Vec<(char, bool)>,
    /// `-o`/`+o` with no name: list options (`true` for the `+o` form).
    pub list: Option<bool>,
    /// `--` or a lone `-` ended the options.
    pub end_marker: bool,
}

/// Scans leading `-abc`/`+abc`/`-o name` arguments, applying them to
/// `opts`. Letters in `extra` are reported instead of applied; `i` and `s`
/// are only accepted when listed there.
pub fn scan_options(
    args: &[String],
    opts: &mut Options,
    extra: &str,
    context: &str,
) -> Result<OptionScan, ShellError> {
    let mut scan = OptionScan::default();
    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        let on = match arg.chars().next() {
            Some('-') => true,
            Some('+') => false,
            _ => break,
        };
        if arg == "--" {
            scan.end_marker = true;
            i += 1;
            break;
        }
        if arg == "-" {
            // A lone `-` turns off -v and -x and ends the options.
            opts.set(Opt::Verbose, false);
            opts.set(Opt::XTrace, false);
            scan.end_marker = true;
            i += 1;
            break;
        }
        if arg.len() == 1 {
            break;
        }
        i += 1;
        for c in arg[1..].chars() {
            if c == 'o' {
                match args.get(i) {
                    Some(name) if !name.starts_with(['-', '+']) => {
                        i += 1;
                        let opt = Options::by_name(name).ok_or_else(|| {
                            ShellError::builtin(context, format!("Illegal option -o {}", name))
                        })?;
                        opts.set(opt, on);
                    }
                    _ => scan.list = Some(!on),
                }
                continue;
            }
            if extra.contains(c) {
                scan.extras.push((c, on));
                continue;
            }
            match Options::by_letter(c) {
                Some(Opt::Interactive | Opt::Stdin) | None => {
                    return Err(ShellError::builtin(
                        context,
                        format!("Illegal option {}{}", if on { '-' } else { '+' }, c),
                    ))
                }
                Some(opt) => opts.set(opt, on),
            }
        }
    }
    scan.next = i;
    Ok(scan)
}
