#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! SMTP/LMTP plumbing for the relay: the ingress server that captures
//! messages into the spool, and the client used to submit them upstream.

pub mod client;
pub mod command;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod server;
pub mod session;
pub mod sink;

pub use command::{Command, HeloVariant};
pub use connection::TlsContext;
pub use error::{ServerError, SessionError};
pub use server::{BoundServer, Server, ServerConfig};
pub use session::SessionOptions;
pub use sink::{Admission, Disposition, MessageSink, RejectReason, SinkError};
