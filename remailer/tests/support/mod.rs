//! In-process harness: a full relay (spool, engine, ingress) wired to a mock
//! upstream, everything on ephemeral ports.

pub mod mock_upstream;

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use remailer_common::{event::CaptureSink, state::RelayState, Signal};
use remailer_relay::{Forwarder, RelayEngine, SenderConfig};
use remailer_smtp::{
    client::{ClientError, Response, SmtpClient, UpstreamOptions},
    MessageSink, Server, ServerConfig, SessionOptions,
};
use remailer_spool::Spool;
use tokio::sync::broadcast;

pub struct Harness {
    pub smtp_addr: SocketAddr,
    pub engine: Arc<RelayEngine<Forwarder>>,
    pub state: Arc<RelayState>,
    pub spool: Arc<Spool>,
    pub events: Arc<CaptureSink>,
    shutdown: broadcast::Sender<Signal>,
}

impl Harness {
    /// Start a relay over `root`, forwarding to `upstream`.
    pub async fn start(
        root: &Path,
        upstream: SocketAddr,
        timer_ms: u64,
        backup: bool,
    ) -> Self {
        let spool = Arc::new(Spool::open(root, backup));
        let state = Arc::new(RelayState::new(timer_ms));
        let events = Arc::new(CaptureSink::new());

        let forwarder = Forwarder::new(SenderConfig {
            host: upstream.ip().to_string(),
            port: upstream.port(),
            secure: false,
            lmtp: false,
            ignore_invalid_cert: false,
            auth: None,
            dsn: None,
            log: false,
            helo_name: "relay.test".to_string(),
        })
        .unwrap();

        let engine = Arc::new(RelayEngine::new(
            Arc::clone(&spool),
            Some(forwarder),
            Arc::clone(&state),
            events.clone(),
        ));

        engine.rescan().await.unwrap();
        state.set_ready(true);

        let server = Server::new(
            ServerConfig {
                address: "127.0.0.1".parse().unwrap(),
                port: 0,
            },
            SessionOptions {
                banner: "relay.test".to_string(),
                greeting: String::new(),
                lmtp: false,
                secure: false,
                tls: None,
                max_message_size: 0,
                command_timeout_secs: 5,
                data_timeout_secs: 5,
                sink: Arc::clone(&engine) as Arc<dyn MessageSink>,
                events: events.clone(),
            },
            Arc::clone(&state),
        );

        let bound = server.bind().await.unwrap();
        let smtp_addr = bound.local_addr().unwrap();

        let (shutdown, _keepalive) = broadcast::channel(16);
        tokio::spawn({
            let receiver = shutdown.subscribe();
            async move {
                let _ = bound.serve(receiver).await;
            }
        });

        if timer_ms > 0 {
            let ticker_engine = Arc::clone(&engine);
            let receiver = shutdown.subscribe();
            tokio::spawn(async move {
                ticker_engine.serve(receiver).await;
            });
        }

        Self {
            smtp_addr,
            engine,
            state,
            spool,
            events,
            shutdown,
        }
    }

    /// Submit one message through the ingress, returning the final reply.
    pub async fn send_mail(
        &self,
        from: &str,
        to: &str,
        body: &str,
    ) -> Result<Response, ClientError> {
        let mut client = SmtpClient::connect(UpstreamOptions {
            host: self.smtp_addr.ip().to_string(),
            port: self.smtp_addr.port(),
            secure: false,
            lmtp: false,
            ignore_invalid_certs: false,
            auth: None,
            dsn: None,
            log: false,
        })
        .await?;

        client.handshake("producer.test").await?;
        client.mail_from(from).await?;
        client.rcpt_to(to).await?;
        let reply = client.data(body.as_bytes(), 1).await?;
        client.quit().await;

        Ok(reply)
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(Signal::Shutdown);
    }
}

/// Poll until the condition holds or the timeout elapses.
pub async fn wait_until(what: &str, timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
