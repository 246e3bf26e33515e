#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::module_name_repetitions
)]

//! Disk-backed message spool.
//!
//! Five directories under one root hold every message the relay knows about:
//! pending timed delivery, pending immediate delivery, failed, and the two
//! post-delivery archives. The directories are the source of truth; the
//! in-memory queues are a cache rebuilt by [`Spool::rescan`].

pub mod error;
pub mod name;
pub mod queue;
pub mod spool;

pub use error::{Result, SpoolError};
pub use name::{next_session_id, MessageMeta};
pub use queue::{Queue, Snapshot};
pub use spool::Spool;
