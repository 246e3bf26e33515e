use std::{net::SocketAddr, sync::Arc, time::Duration};

use remailer_common::{
    event::{Event, EventSink},
    status::Status,
};
use remailer_spool::{next_session_id, MessageMeta};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::{
    command::{Command, HeloVariant},
    connection::Connection,
    error::SessionError,
    extensions::Extension,
    sink::{Disposition, MessageSink, SinkError},
    TlsContext,
};

/// Knobs shared by every ingress session.
pub struct SessionOptions {
    /// Hostname used in the banner and greeting replies.
    pub banner: String,
    /// Extra banner text after "ESMTP".
    pub greeting: String,
    /// Speak LMTP: require LHLO and reply once per recipient after DATA.
    pub lmtp: bool,
    /// Secure mode: STARTTLS and AUTH are advertised.
    pub secure: bool,
    pub tls: Option<TlsContext>,
    /// SIZE limit in bytes; 0 disables the extension.
    pub max_message_size: usize,
    pub command_timeout_secs: u64,
    pub data_timeout_secs: u64,
    pub sink: Arc<dyn MessageSink>,
    pub events: Arc<dyn EventSink>,
}

pub(crate) struct Session<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    connection: Connection<Stream>,
    peer: SocketAddr,
    options: Arc<SessionOptions>,
    id: String,
    greeted: bool,
    /// `Some(None)` is the null reverse-path.
    from: Option<Option<String>>,
    recipients: Vec<String>,
    /// Messages completed on this connection; keeps filenames unique when a
    /// client submits several messages within one millisecond.
    transactions: u32,
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Session<Stream> {
    pub(crate) fn new(stream: Stream, peer: SocketAddr, options: Arc<SessionOptions>) -> Self {
        Self {
            connection: Connection::new(stream),
            peer,
            options,
            id: next_session_id(),
            greeted: false,
            from: None,
            recipients: Vec::new(),
            transactions: 0,
        }
    }

    pub(crate) async fn run(mut self) -> Result<(), SessionError> {
        debug!(peer = %self.peer, session = %self.id, "connected");

        let banner = if self.options.greeting.is_empty() {
            format!("{} {} ESMTP", Status::ServiceReady, self.options.banner)
        } else {
            format!(
                "{} {} ESMTP {}",
                Status::ServiceReady,
                self.options.banner,
                self.options.greeting
            )
        };
        self.connection.send(banner).await?;

        loop {
            let line = self.read_command_line().await?;
            let command = Command::from(line.as_str());

            match command {
                Command::Helo(variant) => self.on_helo(variant).await?,
                Command::MailFrom(from) => self.on_mail_from(from).await?,
                Command::RcptTo(recipients) => self.on_rcpt_to(recipients).await?,
                Command::Data => self.on_data().await?,
                Command::Rset => {
                    self.reset();
                    self.send_status(Status::Ok, "Ok").await?;
                }
                Command::Noop => self.send_status(Status::Ok, "Ok").await?,
                Command::Help => {
                    self.connection
                        .send("214 See RFC 5321 for supported commands")
                        .await?;
                }
                Command::Auth { mechanism, initial } => self.on_auth(&mechanism, initial).await?,
                Command::StartTls => {
                    if self.starttls_available() {
                        self.connection.send("220 2.0.0 Ready to start TLS").await?;
                        let tls = match self.options.tls.clone() {
                            Some(tls) => tls,
                            None => return Err(SessionError::Tls("no TLS context".to_string())),
                        };

                        let connection = self.connection;
                        self.connection = connection.upgrade(&tls).await?;
                        // RFC 3207: the session state resets; the client must
                        // greet again.
                        self.greeted = false;
                        self.reset();
                    } else {
                        self.send_status(Status::NotImplemented, "STARTTLS not available")
                            .await?;
                    }
                }
                Command::Quit => {
                    self.send_status(Status::GoodBye, "Bye").await?;
                    debug!(peer = %self.peer, session = %self.id, "closed");
                    return Ok(());
                }
                Command::Invalid(text) => {
                    warn!(peer = %self.peer, session = %self.id, %text, "invalid command");
                    self.send_status(Status::SyntaxError, "Unrecognized command")
                        .await?;
                }
            }
        }
    }

    fn reset(&mut self) {
        self.from = None;
        self.recipients.clear();
    }

    async fn read_command_line(&mut self) -> Result<String, SessionError> {
        let timeout = Duration::from_secs(self.options.command_timeout_secs);
        match tokio::time::timeout(timeout, self.connection.read_line()).await {
            Ok(line) => line,
            Err(_) => {
                let _ = self
                    .connection
                    .send(format!(
                        "{} Session timed out, closing",
                        Status::Unavailable
                    ))
                    .await;
                Err(SessionError::Timeout(self.options.command_timeout_secs))
            }
        }
    }

    async fn send_status(&mut self, status: Status, text: &str) -> Result<(), SessionError> {
        self.connection.send(format!("{status} {text}")).await
    }

    fn starttls_available(&self) -> bool {
        self.options.secure && self.options.tls.is_some() && !self.connection.is_tls()
    }

    fn capabilities(&self) -> Vec<Extension> {
        let mut capabilities = vec![Extension::Pipelining, Extension::EightBitMime];
        if self.options.max_message_size > 0 {
            capabilities.push(Extension::Size(self.options.max_message_size));
        }
        if self.options.secure {
            capabilities.push(Extension::Auth);
        }
        if self.starttls_available() {
            capabilities.push(Extension::StartTls);
        }
        capabilities
    }

    async fn on_helo(&mut self, variant: HeloVariant) -> Result<(), SessionError> {
        let lmtp_greeting = matches!(variant, HeloVariant::Lhlo(_));
        if self.options.lmtp != lmtp_greeting {
            let expected = if self.options.lmtp { "LHLO" } else { "HELO/EHLO" };
            return self
                .send_status(Status::SyntaxError, &format!("{expected} expected"))
                .await;
        }

        self.greeted = true;
        self.reset();

        let hello = format!(
            "{} says hello to {}",
            self.options.banner,
            variant.host()
        );

        if variant.is_extended() {
            let capabilities = self.capabilities();
            self.connection.send(format!("{}-{hello}", Status::Ok)).await?;
            for (index, capability) in capabilities.iter().enumerate() {
                let last = index + 1 == capabilities.len();
                let separator = if last { ' ' } else { '-' };
                self.connection
                    .send(format!("{}{separator}{capability}", Status::Ok))
                    .await?;
            }
            Ok(())
        } else {
            self.send_status(Status::Ok, &hello).await
        }
    }

    async fn on_mail_from(&mut self, from: Option<String>) -> Result<(), SessionError> {
        if !self.greeted {
            return self
                .send_status(Status::InvalidCommandSequence, "Say hello first")
                .await;
        }

        self.reset();
        self.from = Some(from);
        self.send_status(Status::Ok, "Ok").await
    }

    async fn on_rcpt_to(&mut self, recipients: Vec<String>) -> Result<(), SessionError> {
        if self.from.is_none() {
            return self
                .send_status(Status::InvalidCommandSequence, "MAIL FROM first")
                .await;
        }

        self.recipients.extend(recipients);
        self.send_status(Status::Ok, "Ok").await
    }

    /// Accept all offered credentials: this ingress trusts its LAN and only
    /// implements AUTH so that clients which insist on it can proceed.
    async fn on_auth(
        &mut self,
        mechanism: &str,
        initial: Option<String>,
    ) -> Result<(), SessionError> {
        match mechanism {
            "PLAIN" => {
                if initial.is_none() {
                    self.send_status(Status::AuthContinue, "").await?;
                    let _ = self.read_command_line().await?;
                }
                self.send_status(Status::AuthSuccessful, "Authentication successful")
                    .await
            }
            "LOGIN" => {
                self.send_status(Status::AuthContinue, "VXNlcm5hbWU6").await?;
                let _ = self.read_command_line().await?;
                self.send_status(Status::AuthContinue, "UGFzc3dvcmQ6").await?;
                let _ = self.read_command_line().await?;
                self.send_status(Status::AuthSuccessful, "Authentication successful")
                    .await
            }
            _ => {
                self.send_status(
                    Status::ParameterNotImplemented,
                    "Unrecognized authentication type",
                )
                .await
            }
        }
    }

    async fn on_data(&mut self) -> Result<(), SessionError> {
        if self.from.is_none() || self.recipients.is_empty() {
            return self
                .send_status(Status::InvalidCommandSequence, "RCPT TO first")
                .await;
        }

        // Admission is decided before any body byte is read; a rejected body
        // is still drained so the client can reach QUIT.
        let admission = self.options.sink.admit();

        self.options.events.emit(Event::Receiving {
            session: self.id.clone(),
            from: self.from.clone().flatten(),
            recipients: self.recipients.clone(),
        });

        self.send_status(Status::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            .await?;

        let timeout = Duration::from_secs(self.options.data_timeout_secs);
        let read = tokio::time::timeout(
            timeout,
            self.connection
                .read_data(admission.is_ok(), self.options.max_message_size),
        )
        .await
        .map_err(|_| SessionError::Timeout(self.options.data_timeout_secs))??;

        let replies = if self.options.lmtp {
            self.recipients.len().max(1)
        } else {
            1
        };

        if read.oversize {
            self.reject("message exceeds maximum size");
            return self
                .send_replies(replies, Status::ExceededStorage, "Message too large")
                .await;
        }

        let admission = match admission {
            Ok(admission) => admission,
            Err(reason) => {
                self.reject(reason.describe());
                return self
                    .send_replies(replies, Status::ActionAborted, reason.describe())
                    .await;
            }
        };

        self.transactions += 1;
        let meta = MessageMeta {
            session_id: format!("{}-{}", self.id, self.transactions),
            from: self.from.clone().flatten(),
            recipients: std::mem::take(&mut self.recipients),
        };
        self.from = None;

        match self.options.sink.accept(admission, meta, read.body).await {
            Ok(disposition) => {
                let text = match &disposition {
                    Disposition::Queued { filename } | Disposition::Stored { filename } => {
                        format!("OK: queued as {filename}")
                    }
                    Disposition::Forwarded { filename } => {
                        format!("OK: forwarded as {filename}")
                    }
                };
                self.send_replies(replies, Status::Ok, &text).await
            }
            Err(err) => {
                self.reject(&err.to_string());
                let text = match err {
                    SinkError::Persist(_) => "Unable to store message",
                    SinkError::Upstream(_) => "Upstream delivery failed",
                };
                self.send_replies(replies, Status::ActionAborted, text).await
            }
        }
    }

    fn reject(&mut self, reason: &str) {
        self.options.events.emit(Event::Reject {
            session: self.id.clone(),
            reason: reason.to_string(),
        });
        self.reset();
    }

    async fn send_replies(
        &mut self,
        count: usize,
        status: Status,
        text: &str,
    ) -> Result<(), SessionError> {
        // LMTP answers the end of data once per accepted recipient.
        for _ in 0..count {
            self.send_status(status, text).await?;
        }
        Ok(())
    }
}
