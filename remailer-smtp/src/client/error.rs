use std::io;

use thiserror::Error;

/// Errors raised while talking to the upstream server.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("unable to parse server response: {0}")]
    Parse(String),

    /// The server answered with a 4xx/5xx reply.
    #[error("server answered {code}: {message}")]
    Refused { code: u16, message: String },

    #[error("message could not be composed: {0}")]
    Builder(String),
}

pub type Result<T> = std::result::Result<T, ClientError>;
