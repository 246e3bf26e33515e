use core::fmt::{self, Display, Formatter};

/// The greeting verb a client opened with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeloVariant {
    Helo(String),
    Ehlo(String),
    /// LMTP greeting (RFC 2033).
    Lhlo(String),
}

impl HeloVariant {
    pub fn host(&self) -> &str {
        match self {
            Self::Helo(host) | Self::Ehlo(host) | Self::Lhlo(host) => host,
        }
    }

    /// Extended replies (multi-line capabilities) apply.
    pub const fn is_extended(&self) -> bool {
        matches!(self, Self::Ehlo(_) | Self::Lhlo(_))
    }
}

impl Display for HeloVariant {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Helo(_) => "HELO",
            Self::Ehlo(_) => "EHLO",
            Self::Lhlo(_) => "LHLO",
        })
    }
}

/// A parsed ingress command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(HeloVariant),
    /// `None` is the null reverse-path (`MAIL FROM:<>`, RFC 5321).
    MailFrom(Option<String>),
    RcptTo(Vec<String>),
    Data,
    Rset,
    Noop,
    Help,
    Auth {
        mechanism: String,
        initial: Option<String>,
    },
    StartTls,
    Quit,
    Invalid(String),
}

impl Command {
    fn mail_from(args: &str) -> Self {
        let addr = args.trim();
        if addr.is_empty() {
            return Self::Invalid("MAIL FROM requires an address".to_string());
        }

        // ESMTP parameters (SIZE=, BODY=, ...) after the address are accepted
        // and dropped; this server does not negotiate them.
        let addr = addr.split_whitespace().next().unwrap_or(addr);

        if addr == "<>" {
            return Self::MailFrom(None);
        }

        match mailparse::addrparse(addr) {
            Ok(parsed) => match single_address(&parsed) {
                Some(address) => Self::MailFrom(Some(address)),
                None => Self::Invalid(format!("unparseable sender: {addr}")),
            },
            Err(err) => Self::Invalid(err.to_string()),
        }
    }

    fn rcpt_to(args: &str) -> Self {
        let addr = args.trim();
        if addr.is_empty() {
            return Self::Invalid("RCPT TO requires an address".to_string());
        }

        let addr = addr.split_whitespace().next().unwrap_or(addr);

        match mailparse::addrparse(addr) {
            Ok(parsed) => {
                let recipients = all_addresses(&parsed);
                if recipients.is_empty() {
                    Self::Invalid(format!("unparseable recipient: {addr}"))
                } else {
                    Self::RcptTo(recipients)
                }
            }
            Err(err) => Self::Invalid(err.to_string()),
        }
    }

    fn auth(args: &str) -> Self {
        let mut parts = args.trim().split_whitespace();
        match parts.next() {
            Some(mechanism) => Self::Auth {
                mechanism: mechanism.to_ascii_uppercase(),
                initial: parts.next().map(ToString::to_string),
            },
            None => Self::Invalid("AUTH requires a mechanism".to_string()),
        }
    }
}

fn single_address(list: &mailparse::MailAddrList) -> Option<String> {
    list.iter().find_map(|addr| match addr {
        mailparse::MailAddr::Single(info) => Some(info.addr.clone()),
        mailparse::MailAddr::Group(_) => None,
    })
}

fn all_addresses(list: &mailparse::MailAddrList) -> Vec<String> {
    list.iter()
        .flat_map(|addr| match addr {
            mailparse::MailAddr::Single(info) => vec![info.addr.clone()],
            mailparse::MailAddr::Group(group) => {
                group.addrs.iter().map(|info| info.addr.clone()).collect()
            }
        })
        .collect()
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        let trimmed = line.trim();

        if trimmed.len() >= 10 && trimmed[..10].eq_ignore_ascii_case("MAIL FROM:") {
            return Self::mail_from(&trimmed[10..]);
        }

        if trimmed.len() >= 8 && trimmed[..8].eq_ignore_ascii_case("RCPT TO:") {
            return Self::rcpt_to(&trimmed[8..]);
        }

        let (verb, args) = match trimmed.split_once(' ') {
            Some((verb, args)) => (verb, args.trim()),
            None => (trimmed, ""),
        };

        if verb.eq_ignore_ascii_case("HELO") || verb.eq_ignore_ascii_case("EHLO") || verb.eq_ignore_ascii_case("LHLO") {
            if args.is_empty() {
                return Self::Invalid(format!("expected hostname in {trimmed}"));
            }
            let host = args.to_string();
            return Self::Helo(if verb.eq_ignore_ascii_case("HELO") {
                HeloVariant::Helo(host)
            } else if verb.eq_ignore_ascii_case("EHLO") {
                HeloVariant::Ehlo(host)
            } else {
                HeloVariant::Lhlo(host)
            });
        }

        if verb.eq_ignore_ascii_case("AUTH") {
            return Self::auth(args);
        }

        match () {
            () if trimmed.eq_ignore_ascii_case("DATA") => Self::Data,
            () if trimmed.eq_ignore_ascii_case("RSET") => Self::Rset,
            () if trimmed.eq_ignore_ascii_case("NOOP") => Self::Noop,
            () if trimmed.eq_ignore_ascii_case("HELP") => Self::Help,
            () if trimmed.eq_ignore_ascii_case("STARTTLS") => Self::StartTls,
            () if trimmed.eq_ignore_ascii_case("QUIT") => Self::Quit,
            () => Self::Invalid(line.to_string()),
        }
    }
}
