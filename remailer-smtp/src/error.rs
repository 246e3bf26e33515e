use std::io;

use thiserror::Error;

/// Errors that terminate the ingress listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound. `EADDRINUSE` has already been
    /// retried once by the time this is returned.
    #[error("unable to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors that terminate a single ingress session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client closed the connection")]
    ConnectionClosed,

    #[error("session timed out after {0}s")]
    Timeout(u64),

    #[error("command line exceeded {0} bytes")]
    LineTooLong(usize),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
