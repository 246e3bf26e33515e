use thiserror::Error;

/// Errors raised while forwarding spooled mail.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The sender configuration cannot produce a working transport.
    #[error("invalid sender configuration: {0}")]
    Config(String),

    /// The stored message cannot be parsed, or lacks the envelope fields a
    /// submission needs.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The upstream server refused the message or the connection failed.
    #[error("upstream delivery failed: {0}")]
    Upstream(String),

    #[error(transparent)]
    Spool(#[from] remailer_spool::SpoolError),
}

pub type Result<T> = std::result::Result<T, RelayError>;
