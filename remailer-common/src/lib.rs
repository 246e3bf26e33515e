#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

pub mod event;
pub mod logging;
pub mod state;
pub mod status;

pub use tracing;

/// Broadcast signal used to coordinate shutdown across components.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
