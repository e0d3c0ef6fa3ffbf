//! Observational event stream. Nothing in the engine depends on it being
//! consumed; events sent with no subscriber are dropped.

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::handlers::mail::MailParams;
use crate::session::SmtpSession;

#[derive(Debug, Clone)]
pub enum Event {
    Connect { session: SmtpSession },
    Ehlo { session: SmtpSession, domain: String },
    Mail { session: SmtpSession, address: String, params: MailParams },
    Rcpt { session: SmtpSession, address: String },
    Data { session: SmtpSession, message: Bytes },
    Secure { session: SmtpSession },
    Disconnect { session: SmtpSession },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "CONNECT",
            Self::Ehlo { .. } => "EHLO",
            Self::Mail { .. } => "MAIL",
            Self::Rcpt { .. } => "RCPT",
            Self::Data { .. } => "DATA",
            Self::Secure { .. } => "SECURE",
            Self::Disconnect { .. } => "DISCONNECT",
        }
    }

    pub fn session(&self) -> &SmtpSession {
        match self {
            Self::Connect { session }
            | Self::Ehlo { session, .. }
            | Self::Mail { session, .. }
            | Self::Rcpt { session, .. }
            | Self::Data { session, .. }
            | Self::Secure { session }
            | Self::Disconnect { session } => session,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: Event) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
