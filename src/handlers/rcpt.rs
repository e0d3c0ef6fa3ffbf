use async_trait::async_trait;

use crate::address::{parse_path, take_path};
use crate::command::{Command, Outcome, Verb};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::response::{EnhancedCode, Response};
use crate::session::SmtpSession;
use crate::state::State;

use super::strip_keyword;

pub struct Rcpt;

#[async_trait]
impl Command for Rcpt {
    async fn execute(&self, args: &str, session: &mut SmtpSession, cx: &Context) -> Result<Outcome> {
        if !session.state.permits(Verb::Rcpt) {
            return Ok(Outcome::reply(Response::bad_sequence()));
        }

        let bad_destination = || Outcome::reply(Response::standard(501, EnhancedCode::BAD_DESTINATION_SYNTAX));
        let Some(rest) = strip_keyword(args, "TO:") else {
            return Ok(bad_destination());
        };
        let Ok((path, tail)) = take_path(rest) else {
            return Ok(bad_destination());
        };
        if !tail.trim().is_empty() {
            return Ok(Outcome::reply(Response::bad_arguments()));
        }
        let address = match parse_path(path) {
            Ok(address) if !address.is_empty() => address.to_lowercase(),
            _ => return Ok(bad_destination()),
        };
        if !address.is_ascii() && !session.utf8 {
            return Ok(Outcome::reply(Response::standard(550, EnhancedCode::NON_ASCII)));
        }

        let verdict = cx.policy.on_rcpt_to(&address, session).await.map_err(Error::hook)?;
        let (accepted, response) = verdict.resolve(Response::standard(250, EnhancedCode::DESTINATION_OK));
        if !accepted {
            return Ok(Outcome::reply(response));
        }

        session.rcpt_to.push(address.clone());
        session.transition_to(State::RcptTo);
        cx.events.emit(Event::Rcpt {
            session: session.clone(),
            address,
        });
        Ok(Outcome::reply(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing as cx;
    use crate::handlers::testing::{ready, rendered, Picky};

    async fn in_transaction(cx: &Context) -> SmtpSession {
        let mut s = ready(cx).await;
        assert_eq!(cx.commands.dispatch("MAIL FROM:<u@a.com>", &mut s, cx).await.code(), 250);
        s
    }

    #[tokio::test]
    async fn test_multiple_recipients() {
        let cx = cx::plain();
        let mut s = in_transaction(&cx).await;
        let first = cx.commands.dispatch("RCPT TO:<V@B.com>", &mut s, &cx).await;
        assert_eq!(rendered(&first), "250 2.1.5 Destination address valid\r\n");
        cx.commands.dispatch("RCPT TO:<w@b.com>", &mut s, &cx).await;
        cx.commands.dispatch("rcpt to:<w@b.com>", &mut s, &cx).await;
        assert_eq!(s.rcpt_to, ["v@b.com", "w@b.com", "w@b.com"]);
        assert_eq!(s.state, State::RcptTo);
    }

    #[tokio::test]
    async fn test_requires_mail() {
        let cx = cx::plain();
        let mut s = ready(&cx).await;
        assert_eq!(cx.commands.dispatch("RCPT TO:<v@b.com>", &mut s, &cx).await.code(), 503);
        assert!(s.rcpt_to.is_empty());
    }

    #[tokio::test]
    async fn test_syntax_errors() {
        let cx = cx::plain();
        let mut s = in_transaction(&cx).await;
        for line in ["RCPT TO:<>", "RCPT TO:v@b.com", "RCPT FROM:<v@b.com>", "RCPT TO:<v@>"] {
            let outcome = cx.commands.dispatch(line, &mut s, &cx).await;
            assert!(rendered(&outcome).starts_with("501 5.1.3"), "{line}");
        }
        assert_eq!(s.state, State::MailFrom);
    }

    #[tokio::test]
    async fn test_utf8_needs_smtputf8() {
        let cx = cx::plain();
        let mut s = in_transaction(&cx).await;
        let outcome = cx.commands.dispatch("RCPT TO:<ßtest@example.com>", &mut s, &cx).await;
        assert_eq!(outcome.code(), 550);
        s.utf8 = true;
        let outcome = cx.commands.dispatch("RCPT TO:<ßtest@example.com>", &mut s, &cx).await;
        assert_eq!(outcome.code(), 250);
    }

    #[tokio::test]
    async fn test_hook_failure_is_transient() {
        let cx = cx::plain().with_policy(Picky);
        let mut s = in_transaction(&cx).await;
        let outcome = cx.commands.dispatch("RCPT TO:<v@b.com>", &mut s, &cx).await;
        assert!(rendered(&outcome).starts_with("451 4.3.0"));
        assert_eq!(s.state, State::MailFrom);
        assert!(s.rcpt_to.is_empty());
    }
}
