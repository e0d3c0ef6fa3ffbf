use async_trait::async_trait;

use crate::address::{parse_path, take_path};
use crate::command::{Command, Outcome};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::response::{EnhancedCode, Response};
use crate::session::SmtpSession;
use crate::state::State;

use super::strip_keyword;

/// Declared body type (RFC 6152).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    SevenBit,
    EightBitMime,
}

/// ESMTP parameters given with MAIL FROM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailParams {
    pub size: Option<usize>,
    pub body: Option<Body>,
    pub smtputf8: bool,
    /// Recorded only; nothing downstream enforces it.
    pub requiretls: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("unrecognized parameter {0}")]
    Unknown(String),
    #[error("duplicate parameter {0}")]
    Duplicate(String),
    #[error("invalid value for {0}")]
    Invalid(String),
}

impl MailParams {
    /// Parses whitespace-separated `KEY[=VALUE]` tokens.
    ///
    /// # Errors
    ///
    /// Returns a [`ParamError`] for unknown, repeated or malformed parameters.
    pub fn parse(input: &str) -> std::result::Result<Self, ParamError> {
        let mut params = Self::default();
        let mut seen: Vec<String> = Vec::new();

        for token in input.split_whitespace() {
            let (key, value) = match token.split_once('=') {
                Some((k, v)) => (k.to_ascii_uppercase(), Some(v)),
                None => (token.to_ascii_uppercase(), None),
            };
            if seen.contains(&key) {
                return Err(ParamError::Duplicate(key));
            }

            match (key.as_str(), value) {
                ("SIZE", Some(v)) if !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()) => {
                    // All digits, so the only failure is overflow: larger than any limit.
                    params.size = Some(v.parse().unwrap_or(usize::MAX));
                }
                ("BODY", Some(v)) if v.eq_ignore_ascii_case("7BIT") => params.body = Some(Body::SevenBit),
                ("BODY", Some(v)) if v.eq_ignore_ascii_case("8BITMIME") => {
                    params.body = Some(Body::EightBitMime);
                }
                ("SMTPUTF8", None) => params.smtputf8 = true,
                ("REQUIRETLS", None) => params.requiretls = true,
                ("SIZE" | "BODY" | "SMTPUTF8" | "REQUIRETLS", _) => return Err(ParamError::Invalid(key.clone())),
                _ => return Err(ParamError::Unknown(key.clone())),
            }
            seen.push(key);
        }
        Ok(params)
    }
}

pub struct Mail;

#[async_trait]
impl Command for Mail {
    async fn execute(&self, args: &str, session: &mut SmtpSession, cx: &Context) -> Result<Outcome> {
        let requires_tls = cx.requires_tls();
        let legal = match session.state {
            State::StartTls => true,
            State::EhloReceived => !requires_tls,
            _ => false,
        };
        if !legal {
            if session.state == State::EhloReceived {
                return Ok(Outcome::reply(Response::new(
                    530,
                    EnhancedCode::TLS_REQUIRED,
                    "Must issue a STARTTLS command first",
                )));
            }
            return Ok(Outcome::reply(Response::bad_sequence()));
        }
        // After TLS the client must introduce itself again
        if session.domain.is_none() {
            return Ok(Outcome::reply(Response::bad_sequence()));
        }

        let bad_sender = || Outcome::reply(Response::standard(501, EnhancedCode::BAD_SENDER_SYNTAX));
        let Some(rest) = strip_keyword(args, "FROM:") else {
            return Ok(bad_sender());
        };
        let Ok((path, tail)) = take_path(rest) else {
            return Ok(bad_sender());
        };
        let Ok(address) = parse_path(path) else {
            return Ok(bad_sender());
        };
        let params = match MailParams::parse(tail) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!(session = %session.id, error = %e, "rejected MAIL parameters");
                return Ok(Outcome::reply(Response::bad_arguments()));
            }
        };

        if params.smtputf8 && !cx.config.advertises("SMTPUTF8") {
            return Ok(Outcome::reply(Response::new(
                504,
                EnhancedCode::BAD_ARGUMENTS,
                "SMTPUTF8 is not supported",
            )));
        }
        if !address.is_ascii() && !params.smtputf8 {
            return Ok(Outcome::reply(Response::standard(550, EnhancedCode::NON_ASCII)));
        }
        if params.size.is_some_and(|size| size > cx.config.max_message_size) {
            return Ok(Outcome::reply(Response::standard(552, EnhancedCode::TOO_BIG)));
        }

        let verdict = cx
            .policy
            .on_mail_from(&address, session, &params)
            .await
            .map_err(Error::hook)?;
        let default = Response::new(250, EnhancedCode::SENDER_OK, format!("Originator <{address}> ok"));
        let (accepted, response) = verdict.resolve(default);
        if !accepted {
            return Ok(Outcome::reply(response));
        }

        session.reset();
        session.mail_from = Some(address.clone());
        session.utf8 = params.smtputf8;
        session.transition_to(State::MailFrom);

        cx.events.emit(Event::Mail {
            session: session.clone(),
            address,
            params,
        });
        Ok(Outcome::reply(response))
    }
}
