//! Session states and the sequencing rules between them.

use std::fmt;

use crate::command::Verb;

/// Protocol state of a session, in forward order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Accepted, banner not yet sent.
    New,
    /// Banner sent, waiting for EHLO.
    GreetingSent,
    /// EHLO on a plaintext channel.
    EhloReceived,
    /// TLS negotiated.
    StartTls,
    MailFrom,
    RcptTo,
    /// DATA accepted, body being received.
    DataReady,
    DataDone,
}

impl State {
    /// States in which EHLO is legal.
    pub const EHLO: &'static [Self] = &[Self::New, Self::GreetingSent, Self::StartTls];
    pub const STARTTLS: &'static [Self] = &[Self::EhloReceived];
    pub const RCPT: &'static [Self] = &[Self::MailFrom, Self::RcptTo];
    pub const DATA: &'static [Self] = &[Self::RcptTo];

    /// Whether the current state is one of `allowed`.
    #[must_use]
    pub fn is_one_of(self, allowed: &[Self]) -> bool {
        allowed.contains(&self)
    }

    /// States from which `verb` may be issued. MAIL is not listed here since
    /// its legality depends on the TLS policy (see `handlers::mail`).
    #[must_use]
    pub fn permits(self, verb: Verb) -> bool {
        match verb {
            Verb::Ehlo => self.is_one_of(Self::EHLO),
            Verb::StartTls => self.is_one_of(Self::STARTTLS),
            Verb::Rcpt => self.is_one_of(Self::RCPT),
            Verb::Data => self.is_one_of(Self::DATA),
            Verb::Rset | Verb::Quit => true,
            _ => false,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::GreetingSent => "GREETING_SENT",
            Self::EhloReceived => "EHLO_RECEIVED",
            Self::StartTls => "STARTTLS",
            Self::MailFrom => "MAIL_FROM",
            Self::RcptTo => "RCPT_TO",
            Self::DataReady => "DATA_READY",
            Self::DataDone => "DATA_DONE",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
