use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

/// Lifecycle notifications emitted while a message moves through the relay.
///
/// These replace per-hook callbacks with a single capability: anything that
/// wants to observe the relay implements [`EventSink`] and receives every
/// variant with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A session reached DATA and the body is about to be read.
    Receiving {
        session: String,
        from: Option<String>,
        recipients: Vec<String>,
    },
    /// A message body is about to be written to the spool.
    Saving { queue: &'static str, session: String },
    /// A message file is durable on disk.
    Saved { queue: &'static str, filename: String },
    /// An incoming message was refused; the body was drained and discarded.
    Reject { session: String, reason: String },
    /// An upstream submission is starting.
    Forwarding { filename: String },
    /// An upstream submission succeeded.
    Forwarded { filename: String, response: String },
    Error { scope: &'static str, message: String },
    Warning { scope: &'static str, message: String },
}

/// Consumer of relay [`Event`]s.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

/// Default sink: structured logging through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: Event) {
        match event {
            Event::Receiving {
                session,
                from,
                recipients,
            } => info!(target: "remailer", %session, ?from, ?recipients, "receiving"),
            Event::Saving { queue, session } => {
                info!(target: "remailer", queue, %session, "saving");
            }
            Event::Saved { queue, filename } => {
                info!(target: "remailer", queue, %filename, "saved");
            }
            Event::Reject { session, reason } => {
                warn!(target: "remailer", %session, %reason, "rejected");
            }
            Event::Forwarding { filename } => {
                info!(target: "remailer", %filename, "forwarding");
            }
            Event::Forwarded { filename, response } => {
                info!(target: "remailer", %filename, %response, "forwarded");
            }
            Event::Error { scope, message } => error!(target: "remailer", scope, %message),
            Event::Warning { scope, message } => warn!(target: "remailer", scope, %message),
        }
    }
}

/// Sink that records every event, for assertions in tests.
#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    events: Arc<Mutex<Vec<Event>>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events emitted so far.
    ///
    /// # Panics
    /// If the mutex is poisoned.
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().expect("CaptureSink mutex poisoned").clone()
    }

    /// Number of events matching the predicate.
    ///
    /// # Panics
    /// If the mutex is poisoned.
    pub fn count_matching(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events
            .lock()
            .expect("CaptureSink mutex poisoned")
            .iter()
            .filter(|event| pred(event))
            .count()
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: Event) {
        self.events
            .lock()
            .expect("CaptureSink mutex poisoned")
            .push(event);
    }
}
