//! Error taxonomy for the ledger.
//!
//! Write-side problems are caught before anything touches the log
//! ([`ValidationError`]), replay problems abort the whole read
//! ([`Error::CorruptLog`]), and I/O failures always surface to the caller.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed event rejected before any write.
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),

    /// The log could not be read or written.
    #[error("log I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stored line could not be parsed back into an event.
    #[error("corrupt log at line {line} ({reason}): {content:?}")]
    CorruptLog {
        line: usize,
        content: String,
        reason: ValidationError,
    },

    /// Free text that maps onto no known query intent.
    #[error("could not understand: {text:?}")]
    NotUnderstood { text: String },

    /// Context store (SQLite) failure.
    #[error("context store error: {0}")]
    Context(#[from] rusqlite::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Field-level reasons an event is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing {0}")]
    Missing(&'static str),

    #[error("unknown action {0:?}")]
    UnknownAction(String),

    #[error("unknown category {0:?}")]
    UnknownCategory(String),

    #[error("{field} must be an upper-case token, got {value:?}")]
    NotCanonical { field: &'static str, value: String },

    #[error("remainder must fit on a single line")]
    MultilineRemainder,

    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line is not newline-terminated")]
    Unterminated,
}
