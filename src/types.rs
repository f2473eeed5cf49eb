use nix::errno::Errno;
use thiserror::Error;

/// Exit status used for syntax, usage and expansion errors.
pub const EXIT_SYNTAX: i32 = 2;
/// Command found but could not be executed.
pub const EXIT_NOEXEC: i32 = 126;
/// Command not found.
pub const EXIT_NOTFOUND: i32 = 127;

#[derive(Debug, Clone, Error)]
pub enum ShellError {
    #[error("Syntax error: {message}")]
    Syntax {
        origin: Option<String>,
        line: usize,
        message: String,
    },
    #[error("{0}: parameter not set")]
    ParameterNotSet(String),
    #[error("{0}: parameter null or not set")]
    ParameterNull(String),
    #[error("{name}: {message}")]
    Parameter { name: String, message: String },
    #[error("{0}: bad substitution")]
    BadSubstitution(String),
    #[error("arithmetic expression: {0}")]
    Arithmetic(String),
    #[error("{0}: not found")]
    NotFound(String),
    #[error("{0}: Permission denied")]
    NotExecutable(String),
    #[error("cannot {action} {path}: {reason}")]
    Redirect {
        action: &'static str,
        path: String,
        reason: String,
    },
    #[error("{0}: is read only")]
    Readonly(String),
    #[error("{0}: bad variable name")]
    BadName(String),
    #[error("{0}: Bad fd number")]
    BadFd(String),
    #[error("{builtin}: {message}")]
    Builtin { builtin: String, message: String },
    #[error("{context}: {errno}")]
    Os { context: String, errno: Errno },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ShellError {
    pub fn syntax(origin: Option<String>, line: usize, message: impl Into<String>) -> Self {
        ShellError::Syntax {
            origin,
            line,
            message: message.into(),
        }
    }

    pub fn builtin(builtin: &str, message: impl Into<String>) -> Self {
        ShellError::Builtin {
            builtin: builtin.to_string(),
            message: message.into(),
        }
    }

    pub fn os(context: impl Into<String>, errno: Errno) -> Self {
        ShellError::Os {
            context: context.into(),
            errno,
        }
    }

    /// Names the builtin that raised a variable or open error, as in
    /// `export: 1x: bad variable name`. Other errors pass through.
    pub fn in_builtin(self, builtin: &str) -> Self {
        match self {
            ShellError::Readonly(_) | ShellError::BadName(_) | ShellError::Redirect { .. } => {
                ShellError::builtin(builtin, self.to_string())
            }
            other => other,
        }
    }

    /// Status `$?` takes when this error aborts a command.
    pub fn exit_status(&self) -> i32 {
        match self {
            ShellError::NotFound(_) => EXIT_NOTFOUND,
            ShellError::NotExecutable(_) => EXIT_NOEXEC,
            ShellError::Os { .. } => 1,
            _ => EXIT_SYNTAX,
        }
    }

    /// Line recorded in the error itself, if the error came from the parser.
    pub fn line(&self) -> Option<usize> {
        match self {
            ShellError::Syntax { line, .. } => Some(*line),
            _ => None,
        }
    }

    pub fn origin(&self) -> Option<&str> {
        match self {
            ShellError::Syntax { origin, .. } => origin.as_deref(),
            _ => None,
        }
    }
}

/// The unwind discriminant carried from the raising point to the nearest
/// handler (function call, trap, command substitution or the top level).
#[derive(Debug, Clone)]
pub enum Exception {
    Interrupt,
    Error(ShellError),
    EndOfInput,
    Exit(i32),
}

impl From<ShellError> for Exception {
    fn from(err: ShellError) -> Self {
        Exception::Error(err)
    }
}

impl std::fmt::Display for Exception {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Exception::Interrupt => write!(f, "interrupted"),
            Exception::Error(e) => write!(f, "{}", e),
            Exception::EndOfInput => write!(f, "end of input"),
            Exception::Exit(status) => write!(f, "exit {}", status),
        }
    }
}

pub type ExecuteResult<T = i32> = Result<T, Exception>;
