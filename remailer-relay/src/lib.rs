#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! The relay proper: the upstream forwarder that re-composes and submits a
//! spooled message, and the timed engine that drains the parking queue one
//! message per tick.

pub mod engine;
pub mod error;
pub mod forwarder;

pub use engine::RelayEngine;
pub use error::{RelayError, Result};
pub use forwarder::{Forward, Forwarder, Receipt, SenderConfig};
