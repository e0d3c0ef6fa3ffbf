use async_trait::async_trait;

use crate::command::{Command, Outcome};
use crate::context::Context;
use crate::error::Result;
use crate::response::{EnhancedCode, Response};
use crate::session::SmtpSession;

pub struct Quit;

#[async_trait]
impl Command for Quit {
    async fn execute(&self, _args: &str, _session: &mut SmtpSession, _cx: &Context) -> Result<Outcome> {
        Ok(Outcome::Close(Response::new(221, EnhancedCode::OK, "BYE").into()))
    }
}
