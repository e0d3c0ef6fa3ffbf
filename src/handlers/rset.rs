use async_trait::async_trait;

use crate::command::{Command, Outcome};
use crate::context::Context;
use crate::error::Result;
use crate::response::Response;
use crate::session::SmtpSession;

/// Aborts the transaction and returns to the state left by the last EHLO.
pub struct Rset;

#[async_trait]
impl Command for Rset {
    async fn execute(&self, args: &str, session: &mut SmtpSession, _cx: &Context) -> Result<Outcome> {
        if !args.is_empty() {
            return Ok(Outcome::reply(Response::bad_arguments()));
        }
        session.reset();
        session.transition_to(session.last_ehlo_state);
        Ok(Outcome::reply(Response::ok()))
    }
}
