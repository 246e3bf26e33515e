use std::{fs::File, io::BufReader, path::PathBuf, sync::Arc};

use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::{
    rustls::{
        pki_types::{CertificateDer, PrivateKeyDer},
        ServerConfig,
    },
    server::TlsStream,
    TlsAcceptor,
};
use tracing::debug;

use crate::error::SessionError;

/// Longest accepted command line, including CRLF.
const MAX_LINE: usize = 4096;

/// Read chunk size.
const CHUNK: usize = 8192;

/// End-of-data marker, as seen after a preceding CRLF.
const TERMINATOR: &[u8] = b"\r\n.\r\n";

/// Certificate and key paths for STARTTLS.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsContext {
    pub certificate: PathBuf,
    pub key: PathBuf,
}

/// A message body as read from the wire.
#[derive(Debug)]
pub struct BodyRead {
    /// Dot-unstuffed content; empty when the body was discarded or oversize.
    pub body: Vec<u8>,
    /// The size limit was exceeded; content was dropped on the floor.
    pub oversize: bool,
}

/// An ingress connection, plain or upgraded to TLS.
///
/// Reads are buffered; bytes that arrive pipelined after a command or a body
/// terminator are kept for the next read. The buffer survives a STARTTLS
/// upgrade.
pub enum Connection<Stream: AsyncRead + AsyncWrite + Unpin + Send> {
    Plain { stream: Stream, buffer: Vec<u8> },
    Tls {
        stream: Box<TlsStream<Stream>>,
        buffer: Vec<u8>,
    },
}

impl<Stream: AsyncRead + AsyncWrite + Unpin + Send> Connection<Stream> {
    pub fn new(stream: Stream) -> Self {
        Self::Plain {
            stream,
            buffer: Vec::new(),
        }
    }

    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    fn buffer_mut(&mut self) -> &mut Vec<u8> {
        match self {
            Self::Plain { buffer, .. } | Self::Tls { buffer, .. } => buffer,
        }
    }

    async fn fill(&mut self) -> Result<usize, SessionError> {
        let mut chunk = [0u8; CHUNK];
        let read = match self {
            Self::Plain { stream, .. } => stream.read(&mut chunk).await?,
            Self::Tls { stream, .. } => stream.read(&mut chunk).await?,
        };

        if read == 0 {
            return Err(SessionError::ConnectionClosed);
        }

        self.buffer_mut().extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    /// Send one reply line, CRLF-terminated.
    pub async fn send(&mut self, line: impl core::fmt::Display + Send) -> Result<(), SessionError> {
        let formatted = format!("{line}\r\n");
        remailer_common::outgoing!("{}", formatted.trim_end());
        match self {
            Self::Plain { stream, .. } => {
                stream.write_all(formatted.as_bytes()).await?;
                stream.flush().await?;
            }
            Self::Tls { stream, .. } => {
                stream.write_all(formatted.as_bytes()).await?;
                stream.flush().await?;
            }
        }
        Ok(())
    }

    /// Read one command line, stripped of CRLF.
    pub async fn read_line(&mut self) -> Result<String, SessionError> {
        loop {
            let buffer = self.buffer_mut();
            if let Some(newline) = buffer.iter().position(|byte| *byte == b'\n') {
                let mut line: Vec<u8> = buffer.drain(..=newline).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                let line = String::from_utf8_lossy(&line).into_owned();
                remailer_common::incoming!("{line}");
                return Ok(line);
            }

            if buffer.len() > MAX_LINE {
                return Err(SessionError::LineTooLong(MAX_LINE));
            }

            self.fill().await?;
        }
    }

    /// Read a DATA body up to the `<CRLF>.<CRLF>` terminator.
    ///
    /// With `keep` false the content is drained and discarded (the null
    /// sink). With `max > 0`, content beyond the limit is discarded and the
    /// result is flagged oversize; the stream is still drained to the
    /// terminator either way so the client can continue.
    pub async fn read_data(&mut self, keep: bool, max: usize) -> Result<BodyRead, SessionError> {
        // The terminator match must also fire when the body is empty or the
        // first line starts with a dot, so scanning starts from a virtual
        // preceding CRLF.
        let mut scan: Vec<u8> = b"\r\n".to_vec();
        scan.append(self.buffer_mut());

        let mut oversize = false;
        let mut keeping = keep;

        loop {
            if let Some(position) = find(&scan, TERMINATOR) {
                let rest = scan.split_off(position + TERMINATOR.len());
                *self.buffer_mut() = rest;

                // Content keeps its final CRLF; the dot line is protocol.
                scan.truncate(position + 2);

                let body = if keeping { unstuff(&scan[2..]) } else { Vec::new() };
                return Ok(BodyRead { body, oversize });
            }

            if keeping && max > 0 && scan.len() > max + 2 {
                oversize = true;
                keeping = false;
            }

            if !keeping && scan.len() > CHUNK {
                // Drop everything except enough tail to match a terminator
                // split across reads.
                let tail = scan.split_off(scan.len() - (TERMINATOR.len() - 1));
                scan = tail;
            }

            self.fill_into(&mut scan).await?;
        }
    }

    async fn fill_into(&mut self, scan: &mut Vec<u8>) -> Result<usize, SessionError> {
        let mut chunk = [0u8; CHUNK];
        let read = match self {
            Self::Plain { stream, .. } => stream.read(&mut chunk).await?,
            Self::Tls { stream, .. } => stream.read(&mut chunk).await?,
        };

        if read == 0 {
            return Err(SessionError::ConnectionClosed);
        }

        scan.extend_from_slice(&chunk[..read]);
        Ok(read)
    }

    /// Upgrade a plain connection after STARTTLS, preserving buffered bytes.
    pub async fn upgrade(self, tls: &TlsContext) -> Result<Self, SessionError> {
        debug!("upgrading connection to TLS");

        let certs = load_certs(tls)?;
        let key = load_key(tls)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|err| SessionError::Tls(err.to_string()))?;

        let acceptor = TlsAcceptor::from(Arc::new(config));

        match self {
            Self::Plain { stream, buffer } => {
                let stream = acceptor
                    .accept(stream)
                    .await
                    .map_err(|err| SessionError::Tls(err.to_string()))?;
                Ok(Self::Tls {
                    stream: Box::new(stream),
                    buffer,
                })
            }
            Self::Tls { .. } => Err(SessionError::Tls("connection is already TLS".to_string())),
        }
    }
}

fn load_certs(tls: &TlsContext) -> Result<Vec<CertificateDer<'static>>, SessionError> {
    let file = File::open(&tls.certificate).map_err(|err| {
        SessionError::Tls(format!(
            "unable to read certificate {}: {err}",
            tls.certificate.display()
        ))
    })?;

    rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| SessionError::Tls(err.to_string()))
}

fn load_key(tls: &TlsContext) -> Result<PrivateKeyDer<'static>, SessionError> {
    let file = File::open(&tls.key).map_err(|err| {
        SessionError::Tls(format!("unable to read key {}: {err}", tls.key.display()))
    })?;

    match rustls_pemfile::read_one(&mut BufReader::new(file))
        .map_err(|err| SessionError::Tls(err.to_string()))?
    {
        Some(rustls_pemfile::Item::Pkcs1Key(key)) => Ok(PrivateKeyDer::Pkcs1(key)),
        Some(rustls_pemfile::Item::Pkcs8Key(key)) => Ok(PrivateKeyDer::Pkcs8(key)),
        Some(rustls_pemfile::Item::Sec1Key(key)) => Ok(PrivateKeyDer::Sec1(key)),
        _ => Err(SessionError::Tls(
            "unable to determine key format (expected PKCS1, PKCS8, or SEC1)".to_string(),
        )),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Reverse SMTP transparency: a dot that begins a line was stuffed by the
/// client and is dropped here (RFC 5321 §4.5.2).
fn unstuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut at_line_start = true;

    for byte in data {
        if at_line_start && *byte == b'.' {
            at_line_start = false;
            continue;
        }
        out.push(*byte);
        at_line_start = *byte == b'\n';
    }

    out
}

#[cfg(test)]
mod test {
    use super::{find, unstuff, Connection, TERMINATOR};

    #[test]
    fn unstuffing_drops_leading_dots_only() {
        assert_eq!(unstuff(b"plain line\r\n"), b"plain line\r\n");
        assert_eq!(unstuff(b"..stuffed\r\n"), b".stuffed\r\n");
        assert_eq!(unstuff(b"a\r\n..b\r\nc.d\r\n"), b"a\r\n.b\r\nc.d\r\n");
    }

    #[test]
    fn terminator_search() {
        assert_eq!(find(b"abc\r\n.\r\nxyz", TERMINATOR), Some(3));
        assert_eq!(find(b"abc", TERMINATOR), None);
    }

    #[tokio::test]
    async fn reads_lines_and_keeps_pipelined_bytes() {
        let (client, server) = tokio::io::duplex(1024);
        let mut connection = Connection::new(server);

        let (mut read_half, mut write_half) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut write_half, b"EHLO one\r\nNOOP\r\n")
            .await
            .unwrap();

        assert_eq!(connection.read_line().await.unwrap(), "EHLO one");
        assert_eq!(connection.read_line().await.unwrap(), "NOOP");

        connection.send("250 OK").await.unwrap();
        let mut reply = [0u8; 8];
        tokio::io::AsyncReadExt::read_exact(&mut read_half, &mut reply)
            .await
            .unwrap();
        assert_eq!(&reply, b"250 OK\r\n");
    }

    #[tokio::test]
    async fn reads_body_to_terminator() {
        let (client, server) = tokio::io::duplex(1024);
        let mut connection = Connection::new(server);

        let (_read_half, mut write_half) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(
            &mut write_half,
            b"line one\r\n..dotted\r\n.\r\nQUIT\r\n",
        )
        .await
        .unwrap();

        let read = connection.read_data(true, 0).await.unwrap();
        assert_eq!(read.body, b"line one\r\n.dotted\r\n");
        assert!(!read.oversize);

        // Pipelined QUIT survives the body read.
        assert_eq!(connection.read_line().await.unwrap(), "QUIT");
    }

    #[tokio::test]
    async fn empty_body_terminates_immediately() {
        let (client, server) = tokio::io::duplex(64);
        let mut connection = Connection::new(server);

        let (_read_half, mut write_half) = tokio::io::split(client);
        tokio::io::AsyncWriteExt::write_all(&mut write_half, b".\r\n")
            .await
            .unwrap();

        let read = connection.read_data(true, 0).await.unwrap();
        assert!(read.body.is_empty());
    }

    #[tokio::test]
    async fn discarded_body_is_still_drained() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut connection = Connection::new(server);

        let (_read_half, mut write_half) = tokio::io::split(client);
        let mut payload = vec![b'x'; 32 * 1024];
        payload.extend_from_slice(b"\r\n.\r\nRSET\r\n");
        tokio::io::AsyncWriteExt::write_all(&mut write_half, &payload)
            .await
            .unwrap();

        let read = connection.read_data(false, 0).await.unwrap();
        assert!(read.body.is_empty());
        assert_eq!(connection.read_line().await.unwrap(), "RSET");
    }

    #[tokio::test]
    async fn oversize_body_is_flagged() {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let mut connection = Connection::new(server);

        let (_read_half, mut write_half) = tokio::io::split(client);
        let mut payload = vec![b'x'; 16 * 1024];
        payload.extend_from_slice(b"\r\n.\r\n");
        tokio::io::AsyncWriteExt::write_all(&mut write_half, &payload)
            .await
            .unwrap();

        let read = connection.read_data(true, 1024).await.unwrap();
        assert!(read.oversize);
        assert!(read.body.is_empty());
    }
}
