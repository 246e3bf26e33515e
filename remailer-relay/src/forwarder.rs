use std::path::Path;

use async_trait::async_trait;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use remailer_smtp::client::{
    Attachment, ClientError, Credentials, DsnOptions, MessageBuilder, SmtpClient, UpstreamOptions,
};
use remailer_spool::SpoolError;
use serde::Deserialize;
use tracing::debug;

use crate::error::{RelayError, Result};

/// Upstream sender configuration, as it appears in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct SenderConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub lmtp: bool,
    #[serde(default)]
    pub ignore_invalid_cert: bool,
    #[serde(default)]
    pub auth: Option<Credentials>,
    #[serde(default)]
    pub dsn: Option<DsnOptions>,
    #[serde(default)]
    pub log: bool,
    /// Name presented in EHLO/LHLO towards the upstream.
    #[serde(default = "default_helo")]
    pub helo_name: String,
}

fn default_helo() -> String {
    "remailer".to_string()
}

/// Proof of a successful upstream submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Final upstream reply, e.g. `250 2.0.0 Ok: queued as 4BqT1`.
    pub response: String,
}

/// The seam between the relay engine and the upstream transport; tests
/// substitute a scripted implementation.
#[async_trait]
pub trait Forward: Send + Sync {
    async fn forward(&self, path: &Path) -> Result<Receipt>;
}

/// Reads a spool file, re-composes it, and submits it upstream.
///
/// This is a compose-and-send, not a byte relay: the stored message is
/// parsed, and a fresh message carrying the same sender, recipients,
/// subject, bodies and attachments is submitted.
#[derive(Debug)]
pub struct Forwarder {
    options: UpstreamOptions,
    helo_name: String,
}

impl Forwarder {
    /// Validate the configuration; an instance only exists when an outbound
    /// connection could be constructed from it.
    pub fn new(config: SenderConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(RelayError::Config("sender host is empty".to_string()));
        }
        if config.port == 0 {
            return Err(RelayError::Config("sender port is 0".to_string()));
        }
        if let Some(auth) = &config.auth {
            if auth.user.is_empty() {
                return Err(RelayError::Config("auth user is empty".to_string()));
            }
        }

        Ok(Self {
            options: UpstreamOptions {
                host: config.host,
                port: config.port,
                secure: config.secure,
                lmtp: config.lmtp,
                ignore_invalid_certs: config.ignore_invalid_cert,
                auth: config.auth,
                dsn: config.dsn,
                log: config.log,
            },
            helo_name: config.helo_name,
        })
    }
}

#[async_trait]
impl Forward for Forwarder {
    async fn forward(&self, path: &Path) -> Result<Receipt> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let data = tokio::fs::read(path).await.map_err(|source| {
            RelayError::Spool(SpoolError::Persist {
                filename: filename.clone(),
                source,
            })
        })?;

        let parsed = mailparse::parse_mail(&data)
            .map_err(|err| RelayError::Malformed(err.to_string()))?;
        let content = extract(&parsed)?;

        debug!(
            %filename,
            from = %content.from,
            recipients = content.recipients.len(),
            attachments = content.attachments.len(),
            "submitting upstream"
        );

        let mut builder = MessageBuilder::new().from(content.from.as_str());
        for recipient in &content.recipients {
            builder = builder.to(recipient.as_str());
        }
        if let Some(subject) = &content.subject {
            builder = builder.subject(subject.as_str());
        }
        if let Some(text) = &content.text {
            builder = builder.text(text.as_str());
        }
        if let Some(html) = &content.html {
            builder = builder.html(html.as_str());
        }
        for attachment in content.attachments {
            builder = builder.attach(attachment);
        }
        let message = builder.build().map_err(|err| match err {
            ClientError::Builder(reason) => RelayError::Malformed(reason),
            err => RelayError::Upstream(err.to_string()),
        })?;

        let mut client = SmtpClient::connect(self.options.clone())
            .await
            .map_err(upstream)?;
        client.handshake(&self.helo_name).await.map_err(upstream)?;
        client.mail_from(&content.from).await.map_err(upstream)?;
        for recipient in &content.recipients {
            client.rcpt_to(recipient).await.map_err(upstream)?;
        }
        let reply = client
            .data(&message, content.recipients.len())
            .await
            .map_err(upstream)?;
        client.quit().await;

        Ok(Receipt {
            response: format!("{} {}", reply.code, reply.message()),
        })
    }
}

fn upstream(err: ClientError) -> RelayError {
    RelayError::Upstream(err.to_string())
}

/// The parts of a stored message the composed submission carries over.
#[derive(Debug, Default)]
struct Content {
    from: String,
    recipients: Vec<String>,
    subject: Option<String>,
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

fn extract(parsed: &ParsedMail<'_>) -> Result<Content> {
    let mut content = Content {
        from: header_address(parsed, "From")
            .ok_or_else(|| RelayError::Malformed("missing From header".to_string()))?,
        subject: parsed.headers.get_first_value("Subject"),
        ..Content::default()
    };

    for header in ["To", "Cc"] {
        for value in parsed.headers.get_all_values(header) {
            if let Ok(list) = mailparse::addrparse(&value) {
                collect_addresses(&list, &mut content.recipients);
            }
        }
    }
    if content.recipients.is_empty() {
        return Err(RelayError::Malformed("no recipients".to_string()));
    }

    collect_parts(parsed, &mut content)?;
    Ok(content)
}

fn header_address(parsed: &ParsedMail<'_>, header: &str) -> Option<String> {
    let value = parsed.headers.get_first_value(header)?;
    let list = mailparse::addrparse(&value).ok()?;
    list.iter().find_map(|addr| match addr {
        mailparse::MailAddr::Single(info) => Some(info.addr.clone()),
        mailparse::MailAddr::Group(group) => group.addrs.first().map(|info| info.addr.clone()),
    })
}

fn collect_addresses(list: &mailparse::MailAddrList, into: &mut Vec<String>) {
    for addr in list.iter() {
        match addr {
            mailparse::MailAddr::Single(info) => into.push(info.addr.clone()),
            mailparse::MailAddr::Group(group) => {
                into.extend(group.addrs.iter().map(|info| info.addr.clone()));
            }
        }
    }
}

fn collect_parts(part: &ParsedMail<'_>, content: &mut Content) -> Result<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, content)?;
        }
        return Ok(());
    }

    let mimetype = part.ctype.mimetype.clone();
    let disposition = part.get_content_disposition();
    let attached = disposition.disposition == DispositionType::Attachment;

    if !attached && mimetype == "text/plain" && content.text.is_none() {
        content.text = Some(
            part.get_body()
                .map_err(|err| RelayError::Malformed(err.to_string()))?,
        );
    } else if !attached && mimetype == "text/html" && content.html.is_none() {
        content.html = Some(
            part.get_body()
                .map_err(|err| RelayError::Malformed(err.to_string()))?,
        );
    } else {
        let filename = disposition
            .params
            .get("filename")
            .cloned()
            .or_else(|| part.ctype.params.get("name").cloned())
            .unwrap_or_else(|| "attachment".to_string());

        content.attachments.push(Attachment {
            filename,
            content_type: mimetype,
            data: part
                .get_body_raw()
                .map_err(|err| RelayError::Malformed(err.to_string()))?,
        });
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::{extract, Forwarder, SenderConfig};
    use crate::error::RelayError;

    fn config(host: &str, port: u16) -> SenderConfig {
        SenderConfig {
            host: host.to_string(),
            port,
            secure: false,
            lmtp: false,
            ignore_invalid_cert: false,
            auth: None,
            dsn: None,
            log: false,
            helo_name: "remailer".to_string(),
        }
    }

    #[test]
    fn construction_validates_the_transport() {
        assert!(Forwarder::new(config("smtp.example.com", 587)).is_ok());
        assert!(matches!(
            Forwarder::new(config("", 587)),
            Err(RelayError::Config(_))
        ));
        assert!(matches!(
            Forwarder::new(config("smtp.example.com", 0)),
            Err(RelayError::Config(_))
        ));
    }

    #[test]
    fn extracts_simple_message() {
        let parsed = mailparse::parse_mail(
            b"From: Alice <alice@example.com>\r\n\
              To: bob@example.org, Carol <carol@example.net>\r\n\
              Subject: hello\r\n\
              \r\n\
              plain body\r\n",
        )
        .unwrap();

        let content = extract(&parsed).unwrap();
        assert_eq!(content.from, "alice@example.com");
        assert_eq!(
            content.recipients,
            vec!["bob@example.org", "carol@example.net"]
        );
        assert_eq!(content.subject.as_deref(), Some("hello"));
        assert_eq!(content.text.as_deref().map(str::trim), Some("plain body"));
        assert!(content.html.is_none());
        assert!(content.attachments.is_empty());
    }

    #[test]
    fn extracts_multipart_with_attachment() {
        let parsed = mailparse::parse_mail(
            b"From: alice@example.com\r\n\
              To: bob@example.org\r\n\
              Subject: files\r\n\
              MIME-Version: 1.0\r\n\
              Content-Type: multipart/mixed; boundary=\"XX\"\r\n\
              \r\n\
              --XX\r\n\
              Content-Type: text/plain\r\n\
              \r\n\
              see attachment\r\n\
              --XX\r\n\
              Content-Type: application/pdf\r\n\
              Content-Disposition: attachment; filename=\"doc.pdf\"\r\n\
              Content-Transfer-Encoding: base64\r\n\
              \r\n\
              SGVsbG8=\r\n\
              --XX--\r\n",
        )
        .unwrap();

        let content = extract(&parsed).unwrap();
        assert_eq!(content.text.as_deref().map(str::trim), Some("see attachment"));
        assert_eq!(content.attachments.len(), 1);
        assert_eq!(content.attachments[0].filename, "doc.pdf");
        assert_eq!(content.attachments[0].content_type, "application/pdf");
        assert_eq!(content.attachments[0].data, b"Hello");
    }

    #[test]
    fn missing_from_is_malformed() {
        let parsed =
            mailparse::parse_mail(b"To: bob@example.org\r\n\r\nbody\r\n").unwrap();
        assert!(matches!(
            extract(&parsed),
            Err(RelayError::Malformed(ref reason)) if reason.contains("From")
        ));
    }

    #[test]
    fn missing_recipients_is_malformed() {
        let parsed =
            mailparse::parse_mail(b"From: alice@example.com\r\n\r\nbody\r\n").unwrap();
        assert!(matches!(
            extract(&parsed),
            Err(RelayError::Malformed(ref reason)) if reason.contains("recipients")
        ));
    }
}
