//! Errors raised by every stage of the assembler.
//!
//! All errors are fatal: the first one aborts the whole invocation.
use std::fmt;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// An `Invalid` token reached a stage that needed it to mean something.
    Lex(String),
    Syntax { expected: String, found: String },
    DuplicateSymbol(String),
    UnresolvedSymbol(String),
    EncodingRange(String),
    ExpansionDepth(String),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Error {
    pub kind: ErrorKind,
    pub line: usize,
    pub column: usize,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, line: usize, column: usize) -> Self {
        Error { kind, line, column }
    }

    pub fn syntax<E: Into<String>, F: Into<String>>(expected: E, found: F, line: usize, column: usize) -> Self {
        Error::new(ErrorKind::Syntax { expected: expected.into(), found: found.into() }, line, column)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Lex(raw) => write!(f, "invalid token `{}`", raw),
            ErrorKind::Syntax { expected, found } => write!(f, "expected {}, found {}", expected, found),
            ErrorKind::DuplicateSymbol(name) => write!(f, "symbol `{}` is already defined", name),
            ErrorKind::UnresolvedSymbol(name) => write!(f, "symbol `{}` is never defined", name),
            ErrorKind::EncodingRange(msg) => write!(f, "value out of range: {}", msg),
            ErrorKind::ExpansionDepth(name) => write!(f, "expansion of `{}` nests too deeply", name),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.kind)
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let e = Error::syntax("register", "`,`", 3, 9);
        assert_eq!(e.to_string(), "line 3, column 9: expected register, found `,`");

        let e = Error::new(ErrorKind::UnresolvedSymbol("loop".to_owned()), 1, 1);
        assert_eq!(e.to_string(), "line 1, column 1: symbol `loop` is never defined");
    }
}
