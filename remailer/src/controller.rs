use std::{
    net::SocketAddr,
    path::Path,
    sync::{Arc, LazyLock},
};

use async_trait::async_trait;
use remailer_common::{
    event::{Event, EventSink, LogSink},
    internal,
    state::RelayState,
    Signal,
};
use remailer_control::{
    AppState, ControlBackend, ControlServer, ListenerStatus, PauseTarget, SenderStatus,
    StatusSnapshot, StorageStatus, TimerStatus,
};
use remailer_relay::{Forwarder, RelayEngine};
use remailer_smtp::{MessageSink, Server, ServerConfig, SessionOptions};
use remailer_spool::{Snapshot, Spool, SpoolError};
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::{hostname, Config};

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(16);
    sender
});

/// Socket timeouts for ingress sessions, per the upstream defaults this
/// relay fronts for.
const COMMAND_TIMEOUT_SECS: u64 = 60;
const DATA_TIMEOUT_SECS: u64 = 60;

/// The assembled relay: configuration resolved, components wired.
pub struct Remailer {
    config: Config,
}

impl Remailer {
    pub fn from_config(path: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            config: Config::load(path)?,
        })
    }

    /// Run until SIGINT/SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        let events: Arc<dyn EventSink> = Arc::new(LogSink);

        internal!(level = INFO, "remailer starting");

        let root = config.storage_root()?;
        let spool = Arc::new(Spool::open(&root, config.backup_enabled));
        if !spool.ready() {
            events.emit(Event::Warning {
                scope: "spool",
                message: format!("spool at {} is degraded", root.display()),
            });
        }

        let forwarder = match config.sender() {
            Some(sender) => match Forwarder::new(sender) {
                Ok(forwarder) => Some(forwarder),
                Err(err) => {
                    events.emit(Event::Error {
                        scope: "sender",
                        message: err.to_string(),
                    });
                    None
                }
            },
            None => None,
        };

        // With neither a sender nor usable storage there is nothing this
        // process could ever do with a message.
        if forwarder.is_none() && !spool.ready() {
            anyhow::bail!("neither the upstream sender nor the spool is usable; refusing to start");
        }

        let state = Arc::new(RelayState::new(config.timer_interval_sec * 1000));
        let engine = Arc::new(RelayEngine::new(
            Arc::clone(&spool),
            forwarder,
            Arc::clone(&state),
            Arc::clone(&events),
        ));

        // Recover queue state from disk before accepting or dispatching.
        match engine.rescan().await {
            Ok(snapshot) => info!(
                parking = snapshot.parking.len(),
                direct = snapshot.direct.len(),
                error = snapshot.error.len(),
                "spool recovered"
            ),
            Err(err) => warn!(%err, "initial rescan failed"),
        }

        state.set_ready(true);

        let banner = hostname();
        let server = Server::new(
            ServerConfig {
                address: config.listener_address,
                port: config.listener_port,
            },
            SessionOptions {
                banner,
                greeting: config.listener_greeting.clone(),
                lmtp: config.listener_lmtp,
                secure: config.listener_secure,
                tls: config.listener_tls.clone(),
                max_message_size: config.max_message_size,
                command_timeout_secs: COMMAND_TIMEOUT_SECS,
                data_timeout_secs: DATA_TIMEOUT_SECS,
                sink: Arc::clone(&engine) as Arc<dyn MessageSink>,
                events: Arc::clone(&events),
            },
            Arc::clone(&state),
        );

        // The listener runs as its own task: a bind failure degrades ingress
        // but leaves the dispatcher and the control API working.
        let listener_events = Arc::clone(&events);
        let listener_task = tokio::spawn(async move {
            match server.bind().await {
                Ok(bound) => {
                    if let Err(err) = bound.serve(SHUTDOWN_BROADCAST.subscribe()).await {
                        listener_events.emit(Event::Error {
                            scope: "listener",
                            message: err.to_string(),
                        });
                    }
                }
                Err(err) => {
                    listener_events.emit(Event::Error {
                        scope: "listener",
                        message: err.to_string(),
                    });
                }
            }
        });

        let backend = Arc::new(Backend {
            engine: Arc::clone(&engine),
            state: Arc::clone(&state),
            config: config.clone(),
        });

        let control = config.control().map(|control| {
            ControlServer::new(
                SocketAddr::new(control.address, control.port),
                AppState::new(backend, control.api_key.clone()),
            )
        });

        // Relay ticker: only armed in timed mode with a working sender.
        let ticker = async {
            if state.timer_enabled() && engine.sender_ready() {
                engine.serve(SHUTDOWN_BROADCAST.subscribe()).await;
            } else {
                std::future::pending::<()>().await;
            }
        };

        let control_future = async {
            match &control {
                Some(server) => server.serve(SHUTDOWN_BROADCAST.subscribe()).await,
                None => std::future::pending().await,
            }
        };

        let result = tokio::select! {
            () = ticker => Ok(()),
            result = control_future => result.map_err(|err| anyhow::anyhow!("control server: {err}")),
            result = shutdown() => result,
        };

        internal!(level = INFO, "shutting down");
        let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
        let _ = listener_task.await;

        result
    }
}

/// Resolve on SIGINT or SIGTERM, then ask everything to stop.
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
        _ = terminate.recv() => {
            info!("terminate signal received, shutting down");
        }
    }

    Ok(())
}

/// What the control API sees of the running system.
struct Backend {
    engine: Arc<RelayEngine<Forwarder>>,
    state: Arc<RelayState>,
    config: Config,
}

#[async_trait]
impl ControlBackend for Backend {
    fn status(&self) -> StatusSnapshot {
        let sender_ready = self.engine.sender_ready();

        StatusSnapshot {
            listener: ListenerStatus {
                ready: self.state.ready(),
                running: self.state.listener_running(),
                address: self.config.listener_address.to_string(),
                port: self.config.listener_port,
                mode: if self.config.listener_lmtp { "LMTP" } else { "SMTP" },
                tls: self.config.listener_secure,
            },
            sender: SenderStatus {
                ready: sender_ready,
                running: sender_ready && !self.state.sender_paused(),
                host: self.config.sender_smtp_host.clone().unwrap_or_default(),
                port: self.config.sender_smtp_port,
                mode: if self.config.sender_lmtp { "LMTP" } else { "SMTP" },
                tls: self.config.sender_smtp_secure,
                ignore_crt: self.config.sender_ignore_invalid_cert,
            },
            storage: StorageStatus {
                ready: self.engine.spool().ready(),
            },
            timer: TimerStatus {
                // Enabled iff an interval is configured; 0 is direct mode.
                enabled: self.state.timer_enabled(),
                sec: self.config.timer_interval_sec,
            },
        }
    }

    async fn rescan(&self) -> Result<Snapshot, SpoolError> {
        self.engine.rescan().await
    }

    fn pause(&self, target: PauseTarget, paused: bool) {
        let (name, changed) = match target {
            PauseTarget::Sender => ("sender", self.state.pause_sender(paused)),
            PauseTarget::Listener => ("listener", self.state.pause_listener(paused)),
        };

        if changed {
            info!(target = name, paused, "pause state changed");
        }
    }
}
