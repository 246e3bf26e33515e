//! Upstream SMTP submission client.
//!
//! Connects to the configured submission server (optionally over TLS or
//! speaking LMTP), authenticates if credentials are configured, and submits
//! one composed message per call. Used by the relay engine; deliberately not
//! a general-purpose client.

mod client;
mod connection;
mod error;
mod message;
mod response;

pub use client::{Credentials, DsnOptions, SmtpClient, UpstreamOptions};
pub use error::{ClientError, Result};
pub use message::{Attachment, MessageBuilder};
pub use response::Response;
