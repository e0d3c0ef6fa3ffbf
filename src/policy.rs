//! Integrator hooks consulted at protocol checkpoints.

use async_trait::async_trait;

use crate::handlers::mail::MailParams;
use crate::response::Response;
use crate::session::SmtpSession;

/// Decision returned by a policy hook.
///
/// A hook that fails with an error (rather than a `Reject`) makes the
/// server answer `451 4.3.0` and leave the session state untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed with the default reply.
    Accept,
    /// Proceed, but send this reply instead of the default one.
    AcceptWith(Response),
    /// Refuse with this reply.
    Reject(Response),
}

impl Verdict {
    /// Resolves the verdict against the reply the handler would send on
    /// success. Returns whether the command was accepted.
    pub(crate) fn resolve(self, default: Response) -> (bool, Response) {
        match self {
            Self::Accept => (true, default),
            Self::AcceptWith(r) => (true, r),
            Self::Reject(r) => (false, r),
        }
    }
}

/// Every hook is optional; the defaults accept everything.
#[async_trait]
pub trait Policy: Send + Sync {
    async fn on_connect(&self, _session: &SmtpSession) {}

    async fn on_ehlo(&self, _domain: &str, _session: &SmtpSession) -> anyhow::Result<Verdict> {
        Ok(Verdict::Accept)
    }

    async fn on_mail_from(
        &self,
        _address: &str,
        _session: &SmtpSession,
        _params: &MailParams,
    ) -> anyhow::Result<Verdict> {
        Ok(Verdict::Accept)
    }

    async fn on_rcpt_to(&self, _address: &str, _session: &SmtpSession) -> anyhow::Result<Verdict> {
        Ok(Verdict::Accept)
    }

    /// Called after a successful TLS upgrade. Errors are logged only.
    async fn on_secure(&self, _session: &SmtpSession) -> anyhow::Result<()> {
        Ok(())
    }

    /// Receives the de-stuffed message body.
    async fn on_data(&self, _message: &[u8], _session: &SmtpSession) -> anyhow::Result<Verdict> {
        Ok(Verdict::Accept)
    }

    async fn on_disconnect(&self, _session: &SmtpSession) {}
}

/// Permissive policy used when the integrator supplies none.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Policy for AcceptAll {}
