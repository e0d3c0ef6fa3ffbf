//! Command verbs, the handler registry and the dispatcher.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::handlers;
use crate::response::{EnhancedCode, Reply, Response};
use crate::session::SmtpSession;

/// Verbs the server recognises. Only some of them have handlers; the rest
/// are answered with 502.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Ehlo,
    Helo,
    StartTls,
    Mail,
    Rcpt,
    Data,
    Rset,
    Quit,
    Noop,
    Vrfy,
    Expn,
    Help,
}

impl Verb {
    /// Case-insensitive lookup.
    pub fn parse(word: &str) -> Option<Self> {
        let verb = match word.to_ascii_uppercase().as_str() {
            "EHLO" => Self::Ehlo,
            "HELO" => Self::Helo,
            "STARTTLS" => Self::StartTls,
            "MAIL" => Self::Mail,
            "RCPT" => Self::Rcpt,
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "QUIT" => Self::Quit,
            "NOOP" => Self::Noop,
            "VRFY" => Self::Vrfy,
            "EXPN" => Self::Expn,
            "HELP" => Self::Help,
            _ => return None,
        };
        Some(verb)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ehlo => "EHLO",
            Self::Helo => "HELO",
            Self::StartTls => "STARTTLS",
            Self::Mail => "MAIL",
            Self::Rcpt => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Quit => "QUIT",
            Self::Noop => "NOOP",
            Self::Vrfy => "VRFY",
            Self::Expn => "EXPN",
            Self::Help => "HELP",
        }
    }
}

/// What the connection driver must do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send the reply and wait for the next command.
    Reply(Reply),
    /// Send the reply, then close the connection.
    Close(Reply),
    /// Flush the reply, then run the TLS handshake.
    StartTls(Response),
    /// Send the reply, then hand inbound bytes to the data framer.
    Data(Response),
}

impl Outcome {
    pub fn reply(response: Response) -> Self {
        Self::Reply(response.into())
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::Reply(r) | Self::Close(r) => r.code(),
            Self::StartTls(r) | Self::Data(r) => r.code(),
        }
    }
}

/// A command handler. An `Err` is answered with `451 4.3.0`.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(&self, args: &str, session: &mut SmtpSession, cx: &Context) -> Result<Outcome>;
}

/// Verb → handler table, filled before the server starts.
#[derive(Default)]
pub struct Registry {
    handlers: HashMap<Verb, Box<dyn Command>>,
}

impl Registry {
    /// Registry with the built-in EHLO, STARTTLS, MAIL, RCPT, DATA, RSET
    /// and QUIT handlers.
    pub fn standard() -> Self {
        Self::default()
            .register(Verb::Ehlo, handlers::ehlo::Ehlo)
            .register(Verb::StartTls, handlers::starttls::StartTls)
            .register(Verb::Mail, handlers::mail::Mail)
            .register(Verb::Rcpt, handlers::rcpt::Rcpt)
            .register(Verb::Data, handlers::data::Data)
            .register(Verb::Rset, handlers::rset::Rset)
            .register(Verb::Quit, handlers::quit::Quit)
    }

    #[must_use]
    pub fn register(mut self, verb: Verb, handler: impl Command + 'static) -> Self {
        self.handlers.insert(verb, Box::new(handler));
        self
    }

    pub fn is_registered(&self, verb: Verb) -> bool {
        self.handlers.contains_key(&verb)
    }

    /// Splits `line` into verb and arguments and runs the matching handler.
    /// Lines without a handler count against the unknown-command budget;
    /// once it is used up the reply is 421 and the connection is closed.
    pub async fn dispatch(&self, line: &str, session: &mut SmtpSession, cx: &Context) -> Outcome {
        let line = line.trim_start();
        let (word, args) = match line.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (line, ""),
        };
        let verb = Verb::parse(word);

        if let Some((verb, handler)) = verb.and_then(|v| self.handlers.get(&v).map(|h| (v, h))) {
            session.unknown_commands = 0;
            return match handler.execute(args, session, cx).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(session = %session.id, verb = verb.as_str(), error = %e, "command failed");
                    Outcome::reply(Response::local_error())
                }
            };
        }

        session.unknown_commands += 1;
        if session.unknown_commands >= cx.config.max_unknown_commands {
            tracing::warn!(
                session = %session.id,
                client = %session.client_addr,
                count = session.unknown_commands,
                "too many unknown commands"
            );
            return Outcome::Close(
                Response::new(421, EnhancedCode::SECURITY, "Too many unknown commands").into(),
            );
        }
        if verb.is_some() {
            Outcome::reply(Response::new(502, EnhancedCode::BAD_SEQUENCE, "Command not implemented"))
        } else {
            Outcome::reply(Response::new(500, EnhancedCode::SYNTAX, "Unknown command"))
        }
    }
}
