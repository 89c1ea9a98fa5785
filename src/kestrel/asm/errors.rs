use thiserror::Error;

/// An assembly failure, localized to a 1-based source line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {msg}")]
pub struct AsmError {
    pub line: usize,
    pub msg: String,
}

impl AsmError {
    pub fn new(line: usize, msg: impl Into<String>) -> Self {
        AsmError { line, msg: msg.into() }
    }
}
