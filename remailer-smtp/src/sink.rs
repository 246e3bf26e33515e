use async_trait::async_trait;
use remailer_spool::MessageMeta;

/// Where an admitted message will be placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Timed mode: store and acknowledge; the dispatcher delivers later.
    Parking,
    /// Direct mode: store, then deliver inside the session.
    Direct,
}

/// Why ingress refused a message before reading its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The system has not finished initialising.
    NotReady,
    /// An operator paused ingress.
    Paused,
    /// The queue the message would land in has no usable directory.
    SpoolUnavailable(&'static str),
}

impl RejectReason {
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::NotReady => "service not ready",
            Self::Paused => "service suspended",
            Self::SpoolUnavailable(_) => "storage unavailable",
        }
    }
}

/// What happened to an accepted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Stored in parking for timed delivery.
    Queued { filename: String },
    /// Stored in direct while the sender is paused; no dispatch attempted.
    Stored { filename: String },
    /// Stored in direct and delivered upstream within the session.
    Forwarded { filename: String },
}

/// A message handover that failed after admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The spool write (or a follow-up move) failed.
    #[error("persist failed: {0}")]
    Persist(String),
    /// Direct-mode upstream submission failed; the file sits in the error
    /// queue.
    #[error("upstream failed: {0}")]
    Upstream(String),
}

/// Receiver of messages captured by the ingress server.
///
/// `admit` runs when DATA is accepted, before any body bytes are read, and
/// decides the queue (or the rejection). `accept` runs once the body has been
/// fully read.
#[async_trait]
pub trait MessageSink: Send + Sync {
    fn admit(&self) -> Result<Admission, RejectReason>;

    async fn accept(
        &self,
        admission: Admission,
        meta: MessageMeta,
        body: Vec<u8>,
    ) -> Result<Disposition, SinkError>;
}
