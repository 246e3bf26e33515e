use serde::Deserialize;
use tracing::trace;

use super::{
    connection::ClientConnection,
    error::{ClientError, Result},
    message,
    response::Response,
};

/// Upstream AUTH credentials.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub pass: String,
}

/// Delivery status notification parameters (RFC 3461).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DsnOptions {
    /// `RET=` parameter on MAIL FROM: `FULL` or `HDRS`.
    pub ret: Option<String>,
    /// `NOTIFY=` parameter on each RCPT TO, e.g. `["SUCCESS", "FAILURE"]`.
    pub notify: Option<Vec<String>>,
}

/// How to reach the upstream submission server.
#[derive(Debug, Clone)]
pub struct UpstreamOptions {
    pub host: String,
    pub port: u16,
    /// TLS on connect.
    pub secure: bool,
    /// Use LMTP verbs and per-recipient end-of-data replies.
    pub lmtp: bool,
    pub ignore_invalid_certs: bool,
    pub auth: Option<Credentials>,
    pub dsn: Option<DsnOptions>,
    /// Emit transport-level commands and replies to the log.
    pub log: bool,
}

/// One submission conversation with the upstream server.
pub struct SmtpClient {
    connection: ClientConnection,
    buffer: Vec<u8>,
    options: UpstreamOptions,
}

impl SmtpClient {
    /// Connect and consume the greeting.
    pub async fn connect(options: UpstreamOptions) -> Result<Self> {
        let connection = ClientConnection::open(
            &options.host,
            options.port,
            options.secure,
            options.ignore_invalid_certs,
        )
        .await?;

        let mut client = Self {
            connection,
            buffer: Vec::new(),
            options,
        };

        let greeting = client.read_response().await?;
        if greeting.code != 220 {
            return Err(refused(&greeting));
        }

        Ok(client)
    }

    /// EHLO (or LHLO), then AUTH when credentials are configured.
    pub async fn handshake(&mut self, helo_domain: &str) -> Result<()> {
        let verb = if self.options.lmtp { "LHLO" } else { "EHLO" };
        let reply = self.command(&format!("{verb} {helo_domain}")).await?;
        if !reply.is_success() {
            return Err(refused(&reply));
        }

        if let Some(credentials) = self.options.auth.clone() {
            self.authenticate(&credentials).await?;
        }

        Ok(())
    }

    /// AUTH PLAIN, falling back to AUTH LOGIN when the server refuses the
    /// mechanism.
    async fn authenticate(&mut self, credentials: &Credentials) -> Result<()> {
        let token = message::base64(
            format!("\0{}\0{}", credentials.user, credentials.pass).as_bytes(),
        );

        let reply = self.command(&format!("AUTH PLAIN {token}")).await?;
        if reply.code == 235 {
            return Ok(());
        }
        if !matches!(reply.code, 502 | 504 | 535) {
            return Err(refused(&reply));
        }

        let reply = self.command("AUTH LOGIN").await?;
        if reply.code != 334 {
            return Err(refused(&reply));
        }
        let reply = self
            .command(&message::base64(credentials.user.as_bytes()))
            .await?;
        if reply.code != 334 {
            return Err(refused(&reply));
        }
        let reply = self
            .command(&message::base64(credentials.pass.as_bytes()))
            .await?;
        if reply.code != 235 {
            return Err(refused(&reply));
        }

        Ok(())
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<()> {
        let mut command = format!("MAIL FROM:<{from}>");
        if let Some(ret) = self.options.dsn.as_ref().and_then(|dsn| dsn.ret.clone()) {
            command.push_str(&format!(" RET={ret}"));
        }

        let reply = self.command(&command).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(refused(&reply))
        }
    }

    pub async fn rcpt_to(&mut self, recipient: &str) -> Result<()> {
        let mut command = format!("RCPT TO:<{recipient}>");
        if let Some(notify) = self.options.dsn.as_ref().and_then(|dsn| dsn.notify.clone()) {
            if !notify.is_empty() {
                command.push_str(&format!(" NOTIFY={}", notify.join(",")));
            }
        }

        let reply = self.command(&command).await?;
        if reply.is_success() {
            Ok(())
        } else {
            Err(refused(&reply))
        }
    }

    /// DATA, the dot-stuffed body, and the end-of-data reply.
    ///
    /// LMTP servers answer the final dot once per accepted recipient; every
    /// reply must be positive. The last reply is returned as the receipt.
    pub async fn data(&mut self, body: &[u8], recipients: usize) -> Result<Response> {
        let reply = self.command("DATA").await?;
        if !reply.is_intermediate() {
            return Err(refused(&reply));
        }

        let mut payload = stuff(body);
        payload.extend_from_slice(b".\r\n");
        if self.options.log {
            trace!(target: "remailer", bytes = payload.len(), "sending message data");
        }
        self.connection.send(&payload).await?;

        let replies = if self.options.lmtp { recipients.max(1) } else { 1 };
        let mut receipt = None;
        for _ in 0..replies {
            let reply = self.read_response().await?;
            if !reply.is_success() {
                return Err(refused(&reply));
            }
            receipt = Some(reply);
        }

        receipt.ok_or(ClientError::ConnectionClosed)
    }

    /// Best-effort QUIT; the submission already succeeded or failed.
    pub async fn quit(mut self) {
        let _ = self.command("QUIT").await;
    }

    async fn command(&mut self, command: &str) -> Result<Response> {
        if self.options.log {
            trace!(target: "remailer", command, "upstream command");
        }

        self.connection
            .send(format!("{command}\r\n").as_bytes())
            .await?;
        self.read_response().await
    }

    async fn read_response(&mut self) -> Result<Response> {
        loop {
            if let Some((response, consumed)) = Response::parse(&self.buffer)? {
                self.buffer.drain(..consumed);
                if self.options.log {
                    trace!(target: "remailer", code = response.code, message = response.message(), "upstream reply");
                }
                return Ok(response);
            }

            let mut chunk = [0u8; 8192];
            let read = self.connection.read(&mut chunk).await?;
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

fn refused(reply: &Response) -> ClientError {
    ClientError::Refused {
        code: reply.code,
        message: reply.message(),
    }
}

/// SMTP transparency (RFC 5321 §4.5.2): prefix a dot to every line that
/// starts with one, and make sure the body ends with CRLF.
fn stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 16);
    let mut at_line_start = true;

    for byte in body {
        if at_line_start && *byte == b'.' {
            out.push(b'.');
        }
        out.push(*byte);
        at_line_start = *byte == b'\n';
    }

    if !out.ends_with(b"\r\n") {
        out.extend_from_slice(b"\r\n");
    }

    out
}
