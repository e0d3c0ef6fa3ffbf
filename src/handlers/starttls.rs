use async_trait::async_trait;

use crate::command::{Command, Outcome, Verb};
use crate::context::Context;
use crate::error::Result;
use crate::response::{EnhancedCode, Response};
use crate::session::SmtpSession;

/// Answers 220 and leaves the handshake to the connection driver, which
/// owns the transport.
pub struct StartTls;

#[async_trait]
impl Command for StartTls {
    async fn execute(&self, args: &str, session: &mut SmtpSession, cx: &Context) -> Result<Outcome> {
        if session.is_secure() || !session.state.permits(Verb::StartTls) {
            return Ok(Outcome::reply(Response::bad_sequence()));
        }
        if !args.is_empty() {
            return Ok(Outcome::reply(Response::bad_arguments()));
        }
        if !cx.offers_tls() {
            return Ok(Outcome::reply(Response::new(454, EnhancedCode::SECURITY, "TLS not available")));
        }
        Ok(Outcome::StartTls(Response::new(220, EnhancedCode::OK, "Ready to start TLS")))
    }
}
