use core::fmt::{self, Display, Formatter};

/// Capabilities advertised in the EHLO/LHLO reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// RFC 1870; the value is the maximum message size in bytes.
    Size(usize),
    /// RFC 3207. Only offered in secure mode with a configured certificate.
    StartTls,
    /// RFC 4954. Only offered in secure mode; any credential is accepted.
    Auth,
    /// RFC 6152.
    EightBitMime,
    /// RFC 2920.
    Pipelining,
}

impl Display for Extension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size(limit) => write!(f, "SIZE {limit}"),
            Self::StartTls => f.write_str("STARTTLS"),
            Self::Auth => f.write_str("AUTH PLAIN LOGIN"),
            Self::EightBitMime => f.write_str("8BITMIME"),
            Self::Pipelining => f.write_str("PIPELINING"),
        }
    }
}
