use std::io;

use nix::errno::Errno;
use thiserror::Error;

/// Failures while splitting a line into tokens.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected end of input while looking for matching `{quote}` (column {})", .pos + 1)]
    UnterminatedQuote { quote: char, pos: usize },
}

/// Grammar violations. Positions are byte offsets into the input line.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: empty command")]
    EmptyInput,
    #[error("syntax error near unexpected token `{token}` (column {})", .pos + 1)]
    UnexpectedToken { token: String, pos: usize },
    #[error("syntax error: unexpected end of input after `{after}`")]
    UnexpectedEnd { after: String },
    #[error("syntax error: empty parentheses (column {})", .pos + 1)]
    EmptyParens { pos: usize },
    #[error("syntax error: unmatched `(` (column {})", .pos + 1)]
    UnclosedParen { pos: usize },
    #[error("syntax error: unmatched `)` (column {})", .pos + 1)]
    UnmatchedParen { pos: usize },
    #[error("syntax error: `{op}` expects a target (column {})", .pos + 1)]
    MissingRedirectTarget { op: String, pos: usize },
    #[error("syntax error: redirection without a command (column {})", .pos + 1)]
    MissingCommand { pos: usize },
    #[error("syntax error: background execution with `&` is not supported (column {})", .pos + 1)]
    Background { pos: usize },
    #[error("syntax error: too many nested operators (column {})", .pos + 1)]
    TooDeep { pos: usize },
    #[error("here-document input failed: {0}")]
    HereDocInput(#[source] io::Error),
}

/// A redirection target could not be opened or bound.
#[derive(Debug, Error)]
#[error("{target}: {source}")]
pub struct RedirectionError {
    pub target: String,
    #[source]
    pub source: io::Error,
}

impl RedirectionError {
    pub fn new(target: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self {
            target: target.into(),
            source: source.into(),
        }
    }
}

/// Image replacement failed inside a forked child.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("{0}: command not found")]
    NotFound(String),
    #[error("{name}: {source}")]
    NotExecutable { name: String, source: Errno },
    #[error("{0}: argument contains a NUL byte")]
    InvalidArgument(String),
    #[error("{name}: {source}")]
    Failed { name: String, source: Errno },
}

impl ExecError {
    pub fn from_errno(name: &str, errno: Errno) -> Self {
        match errno {
            Errno::ENOENT | Errno::ENOTDIR => ExecError::NotFound(name.to_string()),
            Errno::EACCES | Errno::EISDIR | Errno::ENOEXEC | Errno::EPERM => {
                ExecError::NotExecutable {
                    name: name.to_string(),
                    source: errno,
                }
            }
            _ => ExecError::Failed {
                name: name.to_string(),
                source: errno,
            },
        }
    }

    /// Exit status the child terminates with.
    pub fn status(&self) -> i32 {
        match self {
            ExecError::NotExecutable { .. } => 126,
            _ => 127,
        }
    }
}

/// Pipe or process creation failed; the rest of the line is abandoned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SystemResourceError {
    #[error("cannot create pipe: {0}")]
    Pipe(Errno),
    #[error("cannot fork: {0}")]
    Fork(Errno),
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Redirection(#[from] RedirectionError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    System(#[from] SystemResourceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exec_error_statuses() {
        assert_eq!(ExecError::from_errno("nope", Errno::ENOENT).status(), 127);
        assert_eq!(ExecError::from_errno("file", Errno::EACCES).status(), 126);
        assert_eq!(ExecError::from_errno("x", Errno::E2BIG).status(), 127);
    }

    #[test]
    fn messages_report_one_based_columns() {
        let err = ParseError::UnexpectedToken {
            token: "|".into(),
            pos: 0,
        };
        assert_eq!(err.to_string(), "syntax error near unexpected token `|` (column 1)");
        assert_eq!(
            ExecError::NotFound("frobnicate".into()).to_string(),
            "frobnicate: command not found"
        );
    }
}
