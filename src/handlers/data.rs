//! DATA command. The body itself is collected by the connection driver
//! through a [`DataFramer`](crate::framer::DataFramer); the functions below
//! settle the transaction once the framer is done.

use async_trait::async_trait;
use bytes::Bytes;

use crate::command::{Command, Outcome, Verb};
use crate::context::Context;
use crate::error::Result;
use crate::events::Event;
use crate::response::{EnhancedCode, Response};
use crate::session::SmtpSession;
use crate::state::State;

pub struct Data;

#[async_trait]
impl Command for Data {
    async fn execute(&self, args: &str, session: &mut SmtpSession, _cx: &Context) -> Result<Outcome> {
        if !session.state.permits(Verb::Data) {
            return Ok(Outcome::reply(Response::bad_sequence()));
        }
        if !args.is_empty() {
            return Ok(Outcome::reply(Response::bad_arguments()));
        }
        session.transition_to(State::DataReady);
        Ok(Outcome::Data(Response::new(
            354,
            EnhancedCode::OK,
            "Start mail input; end with <CRLF>.<CRLF>",
        )))
    }
}

/// Hands the de-stuffed message to the policy and settles the state.
pub(crate) async fn finish(message: Vec<u8>, session: &mut SmtpSession, cx: &Context) -> Response {
    tracing::debug!(session = %session.id, size = message.len(), "message received");
    let resolved = match cx.policy.on_data(&message, session).await {
        Ok(verdict) => verdict.resolve(Response::standard(250, EnhancedCode::MESSAGE_ACCEPTED)),
        Err(e) => {
            tracing::error!(session = %session.id, error = %e, "data hook failed");
            (false, Response::local_error())
        }
    };

    match resolved {
        (true, response) => {
            session.transition_to(State::DataDone);
            cx.events.emit(Event::Data {
                session: session.clone(),
                message: Bytes::from(message),
            });
            response
        }
        (false, response) => {
            session.transition_to(State::RcptTo);
            response
        }
    }
}

/// The body went over the size limit. The client may issue DATA again.
pub(crate) fn too_large(session: &mut SmtpSession) -> Response {
    tracing::warn!(session = %session.id, "message exceeds size limit");
    session.transition_to(State::RcptTo);
    Response::standard(552, EnhancedCode::TOO_BIG)
}

/// No body bytes arrived within the data timeout.
pub(crate) fn timed_out(session: &mut SmtpSession) -> Response {
    tracing::warn!(session = %session.id, "timeout waiting for message data");
    session.transition_to(State::RcptTo);
    Response::standard(451, EnhancedCode::TIMEOUT)
}
