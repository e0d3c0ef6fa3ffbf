use async_trait::async_trait;

use crate::address::is_valid_ehlo;
use crate::command::{Command, Outcome, Verb};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::policy::Verdict;
use crate::response::{EnhancedCode, Reply, Response};
use crate::session::SmtpSession;
use crate::state::State;

pub struct Ehlo;

#[async_trait]
impl Command for Ehlo {
    async fn execute(&self, args: &str, session: &mut SmtpSession, cx: &Context) -> Result<Outcome> {
        if !session.state.permits(Verb::Ehlo) {
            return Ok(Outcome::reply(Response::bad_sequence()));
        }
        let mut tokens = args.split_whitespace();
        let (Some(domain), None) = (tokens.next(), tokens.next()) else {
            return Ok(Outcome::reply(Response::bad_arguments()));
        };
        if !is_valid_ehlo(domain) {
            return Ok(Outcome::reply(Response::new(
                501,
                EnhancedCode::SYNTAX,
                "Invalid domain name or address literal",
            )));
        }

        let reply = match cx.policy.on_ehlo(domain, session).await.map_err(Error::hook)? {
            Verdict::Accept => {
                let mut lines = vec![format!("{} Hello, {domain}", cx.config.greeting)];
                lines.extend(capabilities(session, cx));
                Reply::Multi { code: 250, lines }
            }
            Verdict::AcceptWith(response) => response.into(),
            Verdict::Reject(response) => return Ok(Outcome::reply(response)),
        };

        let offers_starttls = offers_starttls(session, cx);
        let next = if session.is_secure() {
            State::StartTls
        } else {
            State::EhloReceived
        };
        session.ehlo(domain.to_string(), next);
        session.enhanced_status_codes = !offers_starttls && cx.config.advertises("ENHANCEDSTATUSCODES");

        cx.events.emit(Event::Ehlo {
            session: session.clone(),
            domain: domain.to_string(),
        });
        Ok(Outcome::Reply(reply))
    }
}

/// On a plaintext channel that can be secured only STARTTLS is offered.
fn offers_starttls(session: &SmtpSession, cx: &Context) -> bool {
    !session.is_secure() && cx.offers_tls()
}

fn capabilities(session: &SmtpSession, cx: &Context) -> Vec<String> {
    if offers_starttls(session, cx) {
        return vec!["STARTTLS".to_string()];
    }
    let mut caps = vec![format!("SIZE {}", cx.config.max_message_size)];
    caps.extend(cx.config.extensions.iter().cloned());
    caps
}
