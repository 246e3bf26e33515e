use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use remailer_common::{
    event::{Event, EventSink},
    state::RelayState,
    Signal,
};
use remailer_smtp::{Admission, Disposition, MessageSink, RejectReason, SinkError};
use remailer_spool::{MessageMeta, Queue, Snapshot, Spool, SpoolError};
use tracing::{debug, warn};

use crate::forwarder::Forward;

/// The timed dispatcher and the landing point for ingress messages.
///
/// Owns the decision logic on both sides of the spool: where an incoming
/// message is placed (admission), and how a parked message leaves (one
/// upstream submission per tick, never more than one in flight).
pub struct RelayEngine<F> {
    spool: Arc<Spool>,
    forwarder: Option<F>,
    state: Arc<RelayState>,
    events: Arc<dyn EventSink>,
}

impl<F: Forward> RelayEngine<F> {
    pub fn new(
        spool: Arc<Spool>,
        forwarder: Option<F>,
        state: Arc<RelayState>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            spool,
            forwarder,
            state,
            events,
        }
    }

    pub fn spool(&self) -> &Arc<Spool> {
        &self.spool
    }

    pub fn state(&self) -> &Arc<RelayState> {
        &self.state
    }

    /// An upstream transport is configured and constructible.
    pub fn sender_ready(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Rescan the spool with the `scanning` flag raised so concurrent ticks
    /// stand down while the queues are being replaced.
    pub async fn rescan(&self) -> Result<Snapshot, SpoolError> {
        self.state.set_scanning(true);
        let result = self.spool.rescan().await;
        self.state.set_scanning(false);
        result
    }

    /// Run the dispatcher until shutdown. One tick per interval; the tick
    /// body is awaited to completion, so at most one submission is ever in
    /// flight.
    pub async fn serve(&self, mut shutdown: tokio::sync::broadcast::Receiver<Signal>) {
        let period = self.state.timer_interval_ms();
        if period == 0 {
            // Direct mode: nothing to drive; park until shutdown.
            let _ = shutdown.recv().await;
            return;
        }

        let mut ticker = tokio::time::interval(Duration::from_millis(period));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        debug!(period_ms = period, "relay ticker armed");

        loop {
            tokio::select! {
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                        debug!("relay ticker stopping");
                        return;
                    }
                }
                _ = ticker.tick() => {
                    // A tick must never kill the ticker; failures are logged
                    // and the next tick proceeds.
                    self.tick().await;
                }
            }
        }
    }

    /// One dispatcher tick: pop the parking head and submit it.
    pub async fn tick(&self) {
        if self.state.sender_paused() {
            return;
        }

        // A rescan is replacing the queues; dispatching against a half-built
        // view risks double delivery when direct entries are in play.
        if self.state.scanning() && !self.spool.is_empty(Queue::Direct) {
            return;
        }

        let Some(forwarder) = &self.forwarder else {
            return;
        };
        let Some(filename) = self.spool.pop_parking() else {
            return;
        };

        if self
            .dispatch(forwarder, Queue::Parking, &filename)
            .await
            .is_err()
        {
            // The on-disk entry now sits in error/; the in-memory tail entry
            // buys it one more attempt this run and the error entry survives
            // a restart.
            self.spool.push_back_parking(filename);
        }
    }

    /// Submit one file and settle its disk placement.
    async fn dispatch(&self, forwarder: &F, origin: Queue, filename: &str) -> Result<(), ()> {
        self.events.emit(Event::Forwarding {
            filename: filename.to_string(),
        });

        match forwarder
            .forward(&self.spool.path_of(origin, filename))
            .await
        {
            Ok(receipt) => {
                self.events.emit(Event::Forwarded {
                    filename: filename.to_string(),
                    response: receipt.response,
                });
                self.settle_success(origin, filename).await;
                Ok(())
            }
            Err(err) => {
                self.events.emit(Event::Error {
                    scope: "forward",
                    message: format!("{filename}: {err}"),
                });

                if let Err(err) = self.spool.move_to_error(filename, origin).await {
                    self.events.emit(Event::Warning {
                        scope: "spool",
                        message: format!("unable to move {filename} to error: {err}"),
                    });
                }
                Err(())
            }
        }
    }

    /// After a successful submission: archive or unlink. Failures here are
    /// logged but the message is never re-queued, that would risk a double
    /// delivery.
    async fn settle_success(&self, origin: Queue, filename: &str) {
        let result = if self.spool.backup_enabled() {
            self.spool.move_to_backup(filename, origin).await
        } else {
            self.spool.remove(filename, origin).await
        };

        if let Err(err) = result {
            warn!(%filename, %err, "post-delivery cleanup failed");
            self.events.emit(Event::Warning {
                scope: "spool",
                message: format!("post-delivery cleanup of {filename} failed: {err}"),
            });
        }
    }
}

#[async_trait]
impl<F: Forward> MessageSink for RelayEngine<F> {
    fn admit(&self) -> Result<Admission, RejectReason> {
        if !self.state.ready() {
            return Err(RejectReason::NotReady);
        }
        if self.state.listener_paused() {
            return Err(RejectReason::Paused);
        }

        if self.state.timer_enabled() {
            if self.spool.available(Queue::Parking) {
                Ok(Admission::Parking)
            } else {
                Err(RejectReason::SpoolUnavailable(Queue::Parking.label()))
            }
        } else if self.spool.available(Queue::Direct) {
            Ok(Admission::Direct)
        } else {
            Err(RejectReason::SpoolUnavailable(Queue::Direct.label()))
        }
    }

    async fn accept(
        &self,
        admission: Admission,
        meta: MessageMeta,
        body: Vec<u8>,
    ) -> Result<Disposition, SinkError> {
        let queue = match admission {
            Admission::Parking => Queue::Parking,
            Admission::Direct => Queue::Direct,
        };

        self.events.emit(Event::Saving {
            queue: queue.label(),
            session: meta.session_id.clone(),
        });

        let filename = self
            .spool
            .write(queue, &meta, &body)
            .await
            .map_err(|err| SinkError::Persist(err.to_string()))?;

        self.events.emit(Event::Saved {
            queue: queue.label(),
            filename: filename.clone(),
        });

        match admission {
            Admission::Parking => {
                self.spool.enqueue(Queue::Parking, filename.clone());
                Ok(Disposition::Queued { filename })
            }
            Admission::Direct => {
                let Some(forwarder) = &self.forwarder else {
                    return Ok(Disposition::Stored { filename });
                };
                if self.state.sender_paused() {
                    return Ok(Disposition::Stored { filename });
                }

                match self.dispatch(forwarder, Queue::Direct, &filename).await {
                    Ok(()) => Ok(Disposition::Forwarded { filename }),
                    Err(()) => Err(SinkError::Upstream(format!(
                        "{filename} moved to the error queue"
                    ))),
                }
            }
        }
    }
}
