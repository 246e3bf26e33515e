//! Composition of the outbound message.
//!
//! Forwarded mail is composed fresh from the parsed representation rather
//! than relayed byte-for-byte: body parts and attachments are re-assembled
//! into a new MIME structure here.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use super::error::{ClientError, Result};

static BOUNDARY_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An attachment carried over from the stored message.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Builder for the composed RFC 5322 message.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    to: Vec<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from(mut self, email: impl Into<String>) -> Self {
        self.from = Some(email.into());
        self
    }

    #[must_use]
    pub fn to(mut self, email: impl Into<String>) -> Self {
        self.to.push(email.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text = Some(body.into());
        self
    }

    #[must_use]
    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html = Some(body.into());
        self
    }

    #[must_use]
    pub fn attach(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Render the message.
    pub fn build(self) -> Result<Vec<u8>> {
        if self.from.is_none() {
            return Err(ClientError::Builder("missing From".to_string()));
        }
        if self.to.is_empty() {
            return Err(ClientError::Builder("missing To".to_string()));
        }

        let mut out = Vec::with_capacity(2048);

        if let Some(from) = &self.from {
            write!(&mut out, "From: {from}\r\n")?;
        }
        write!(&mut out, "To: {}\r\n", self.to.join(", "))?;
        if let Some(subject) = &self.subject {
            write!(&mut out, "Subject: {subject}\r\n")?;
        }
        write!(&mut out, "Date: {}\r\n", chrono::Utc::now().to_rfc2822())?;
        write!(&mut out, "MIME-Version: 1.0\r\n")?;

        if self.attachments.is_empty() {
            self.write_body(&mut out)?;
        } else {
            let boundary = boundary("mixed");
            write!(
                &mut out,
                "Content-Type: multipart/mixed; boundary=\"{boundary}\"\r\n\r\n"
            )?;

            write!(&mut out, "--{boundary}\r\n")?;
            self.write_body(&mut out)?;
            write!(&mut out, "\r\n")?;

            for attachment in &self.attachments {
                write!(&mut out, "--{boundary}\r\n")?;
                write!(&mut out, "Content-Type: {}\r\n", attachment.content_type)?;
                write!(&mut out, "Content-Transfer-Encoding: base64\r\n")?;
                write!(
                    &mut out,
                    "Content-Disposition: attachment; filename=\"{}\"\r\n\r\n",
                    attachment.filename
                )?;
                write_wrapped(&mut out, &base64(&attachment.data))?;
            }

            write!(&mut out, "--{boundary}--\r\n")?;
        }

        Ok(out)
    }

    /// The body headers and content: plain text, HTML, or an alternative
    /// pair of both.
    fn write_body(&self, out: &mut Vec<u8>) -> Result<()> {
        match (&self.text, &self.html) {
            (Some(text), None) => {
                write!(out, "Content-Type: text/plain; charset=utf-8\r\n\r\n")?;
                write!(out, "{text}\r\n")?;
            }
            (None, Some(html)) => {
                write!(out, "Content-Type: text/html; charset=utf-8\r\n\r\n")?;
                write!(out, "{html}\r\n")?;
            }
            (Some(text), Some(html)) => {
                let boundary = boundary("alt");
                write!(
                    out,
                    "Content-Type: multipart/alternative; boundary=\"{boundary}\"\r\n\r\n"
                )?;
                write!(out, "--{boundary}\r\n")?;
                write!(out, "Content-Type: text/plain; charset=utf-8\r\n\r\n")?;
                write!(out, "{text}\r\n")?;
                write!(out, "--{boundary}\r\n")?;
                write!(out, "Content-Type: text/html; charset=utf-8\r\n\r\n")?;
                write!(out, "{html}\r\n")?;
                write!(out, "--{boundary}--\r\n")?;
            }
            (None, None) => {
                write!(out, "Content-Type: text/plain; charset=utf-8\r\n\r\n")?;
            }
        }
        Ok(())
    }
}

fn boundary(kind: &str) -> String {
    format!(
        "----=_remailer_{kind}_{:08x}",
        BOUNDARY_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Base64 without line wrapping (also used for AUTH tokens).
pub(super) fn base64(data: &[u8]) -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(3) {
        let mut buf = [0u8; 3];
        buf[..chunk.len()].copy_from_slice(chunk);

        out.push(ALPHABET[(buf[0] >> 2) as usize] as char);
        out.push(ALPHABET[(((buf[0] & 0x03) << 4) | (buf[1] >> 4)) as usize] as char);
        out.push(if chunk.len() > 1 {
            ALPHABET[(((buf[1] & 0x0F) << 2) | (buf[2] >> 6)) as usize] as char
        } else {
            '='
        });
        out.push(if chunk.len() > 2 {
            ALPHABET[(buf[2] & 0x3F) as usize] as char
        } else {
            '='
        });
    }

    out
}

/// Emit base64 content wrapped at 76 columns (RFC 2045).
fn write_wrapped(out: &mut Vec<u8>, encoded: &str) -> Result<()> {
    for line in encoded.as_bytes().chunks(76) {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::{base64, Attachment, MessageBuilder};

    #[test]
    fn simple_text_message() {
        let message = MessageBuilder::new()
            .from("sender@example.com")
            .to("recipient@example.org")
            .subject("Test")
            .text("Hello World")
            .build()
            .unwrap();

        let message = String::from_utf8(message).unwrap();
        assert!(message.contains("From: sender@example.com"));
        assert!(message.contains("To: recipient@example.org"));
        assert!(message.contains("Subject: Test"));
        assert!(message.contains("Content-Type: text/plain"));
        assert!(message.contains("Hello World"));
    }

    #[test]
    fn text_and_html_become_alternative() {
        let message = MessageBuilder::new()
            .from("a@b.c")
            .to("d@e.f")
            .text("plain")
            .html("<p>rich</p>")
            .build()
            .unwrap();

        let message = String::from_utf8(message).unwrap();
        assert!(message.contains("multipart/alternative"));
        assert!(message.contains("plain"));
        assert!(message.contains("<p>rich</p>"));
    }

    #[test]
    fn attachments_become_multipart_mixed() {
        let message = MessageBuilder::new()
            .from("a@b.c")
            .to("d@e.f")
            .text("see attachment")
            .attach(Attachment {
                filename: "notes.txt".to_string(),
                content_type: "text/plain".to_string(),
                data: b"Hello World".to_vec(),
            })
            .build()
            .unwrap();

        let message = String::from_utf8(message).unwrap();
        assert!(message.contains("multipart/mixed"));
        assert!(message.contains("filename=\"notes.txt\""));
        assert!(message.contains("SGVsbG8gV29ybGQ="));
    }

    #[test]
    fn missing_envelope_is_refused() {
        assert!(MessageBuilder::new().to("d@e.f").build().is_err());
        assert!(MessageBuilder::new().from("a@b.c").build().is_err());
    }

    #[test]
    fn base64_known_vectors() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"Hello World"), "SGVsbG8gV29ybGQ=");
    }
}
