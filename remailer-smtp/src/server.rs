use std::{
    io::ErrorKind,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use futures_util::future::join_all;
use remailer_common::{state::RelayState, Signal};
use tokio::net::TcpListener;
use tracing::{debug, error, warn};

use crate::{error::ServerError, session::Session, SessionOptions};

/// Where the ingress listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: IpAddr,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// The ingress SMTP/LMTP listener, not yet bound.
pub struct Server {
    config: ServerConfig,
    options: Arc<SessionOptions>,
    state: Arc<RelayState>,
}

impl Server {
    pub fn new(config: ServerConfig, options: SessionOptions, state: Arc<RelayState>) -> Self {
        Self {
            config,
            options: Arc::new(options),
            state,
        }
    }

    /// Bind the configured address.
    ///
    /// `EADDRINUSE` commonly means a predecessor is still tearing down its
    /// socket, so that case gets one explicit second bind of the same
    /// address after a second of sleep. Anything else, and a failed retry,
    /// is fatal to the listener.
    pub async fn bind(self) -> Result<BoundServer, ServerError> {
        let address = self.config.socket();

        let listener = match TcpListener::bind(address).await {
            Ok(listener) => listener,
            Err(err) if err.kind() == ErrorKind::AddrInUse => {
                warn!(%address, "address in use, retrying bind in 1s");
                tokio::time::sleep(Duration::from_secs(1)).await;
                TcpListener::bind(address)
                    .await
                    .map_err(|source| ServerError::Bind {
                        address: address.to_string(),
                        source,
                    })?
            }
            Err(source) => {
                return Err(ServerError::Bind {
                    address: address.to_string(),
                    source,
                })
            }
        };

        debug!(address = %address, "ingress bound");

        Ok(BoundServer {
            listener,
            options: self.options,
            state: self.state,
        })
    }
}

/// A bound listener, ready to accept producer sessions.
///
/// One [`Session`] task runs per connection. `listener_running` is raised
/// while the accept loop runs and lowered when it stops for any reason.
pub struct BoundServer {
    listener: TcpListener,
    options: Arc<SessionOptions>,
    state: Arc<RelayState>,
}

impl BoundServer {
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn serve(
        self,
        shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        self.state.set_listener_running(true);
        let result = Self::accept_loop(&self.listener, &self.options, shutdown).await;
        self.state.set_listener_running(false);
        result
    }

    async fn accept_loop(
        listener: &TcpListener,
        options: &Arc<SessionOptions>,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                signal = shutdown.recv() => {
                    if matches!(signal, Ok(Signal::Shutdown) | Err(_)) {
                        debug!("ingress shutting down, finishing sessions");
                        join_all(sessions).await;
                        return Ok(());
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection?;
                    let options = Arc::clone(options);

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = Session::new(stream, peer, options).run().await {
                            match err {
                                crate::SessionError::ConnectionClosed => {
                                    debug!(%peer, "client hung up");
                                }
                                err => error!(%peer, %err, "session failed"),
                            }
                        }
                    }));

                    // Keep the handle list from growing without bound on
                    // long-lived processes.
                    sessions.retain(|session| !session.is_finished());
                }
            }
        }
    }
}
