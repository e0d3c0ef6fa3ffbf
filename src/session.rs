use std::fmt;
use std::net::SocketAddr;

use chrono::{DateTime, Local};
use rand::Rng;

use crate::state::State;

/// Opaque per-connection identifier (16 hex digits).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn random() -> Self {
        let n: u64 = rand::thread_rng().gen();
        Self(format!("{n:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Negotiated TLS parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsInfo {
    pub version: String,
    pub cipher: String,
    pub peer_certificate: bool,
}

#[derive(Debug, Clone)]
pub struct SmtpSession {
    pub id: SessionId,
    pub client_addr: SocketAddr,
    pub connected_at: DateTime<Local>,
    /// Domain given in the last EHLO.
    pub domain: Option<String>,
    /// Sender of the current transaction; `Some("")` is the null sender.
    pub mail_from: Option<String>,
    pub rcpt_to: Vec<String>,
    pub state: State,
    /// State reached by the most recent EHLO, restored by RSET.
    pub last_ehlo_state: State,
    pub tls: Option<TlsInfo>,
    pub unknown_commands: usize,
    pub enhanced_status_codes: bool,
    pub utf8: bool,
}

impl SmtpSession {
    pub fn new(client_addr: SocketAddr) -> Self {
        Self {
            id: SessionId::random(),
            client_addr,
            connected_at: Local::now(),
            domain: None,
            mail_from: None,
            rcpt_to: Vec::new(),
            state: State::New,
            last_ehlo_state: State::GreetingSent,
            tls: None,
            unknown_commands: 0,
            enhanced_status_codes: false,
            utf8: false,
        }
    }

    pub fn is_secure(&self) -> bool {
        self.tls.is_some()
    }

    pub fn transition_to(&mut self, state: State) {
        tracing::debug!(session = %self.id, from = %self.state, to = %state, "state transition");
        self.state = state;
    }

    /// Clears the mail transaction (sender, recipients, SMTPUTF8).
    pub fn reset(&mut self) {
        self.mail_from = None;
        self.rcpt_to.clear();
        self.utf8 = false;
    }

    /// Records a completed EHLO and remembers where RSET should return to.
    pub fn ehlo(&mut self, domain: String, state: State) {
        self.reset();
        self.domain = Some(domain);
        self.last_ehlo_state = state;
        self.transition_to(state);
    }

    /// Records a successful TLS handshake. Everything learned from the
    /// client before the handshake is discarded (RFC 3207 section 4.2).
    pub fn secure(&mut self, info: TlsInfo) {
        self.reset();
        self.domain = None;
        self.enhanced_status_codes = false;
        self.tls = Some(info);
        self.last_ehlo_state = State::StartTls;
        self.transition_to(State::StartTls);
    }
}
