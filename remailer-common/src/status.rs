use core::fmt::{self, Display, Formatter};

/// SMTP reply codes used on both the ingress and upstream sides.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum Status {
    ServiceReady = 220,
    GoodBye = 221,
    AuthSuccessful = 235,
    Ok = 250,
    AuthContinue = 334,
    StartMailInput = 354,
    Unavailable = 421,
    MailboxBusy = 450,
    ActionAborted = 451,
    InsufficientStorage = 452,
    SyntaxError = 500,
    NotImplemented = 502,
    InvalidCommandSequence = 503,
    ParameterNotImplemented = 504,
    Error = 550,
    ExceededStorage = 552,
    TransactionFailed = 554,
}

impl Status {
    /// Permanent rejection (5xx).
    pub fn is_permanent(self) -> bool {
        self as u32 >= 500
    }

    /// Temporary rejection (4xx).
    pub fn is_temporary(self) -> bool {
        (400..500).contains(&(self as u32))
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        write!(fmt, "{}", *self as u32)
    }
}
