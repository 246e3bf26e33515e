use std::io;

use thiserror::Error;

/// Errors raised by spool operations.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// The backing directory for a queue could not be created or accessed.
    #[error("spool queue '{0}' is unavailable")]
    Unavailable(&'static str),

    /// A write, rename or unlink failed mid-operation. Also covers files
    /// removed out-of-band between enqueue and dispatch.
    #[error("failed to persist '{filename}': {source}")]
    Persist {
        filename: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SpoolError {
    pub(crate) fn persist(filename: impl Into<String>, source: io::Error) -> Self {
        Self::Persist {
            filename: filename.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SpoolError>;
