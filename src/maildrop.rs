use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use starttls_smtpd::{Policy, Response, SmtpSession, Verdict};

/// Policy that stores every accepted message as an `.eml` file.
pub struct Maildrop {
    dir: PathBuf,
    seq: AtomicU64,
}

impl Maildrop {
    pub fn new(dir: PathBuf) -> Result<Self> {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create data directory: {:?}", dir))?;
            tracing::info!(?dir, "data directory created");
        }
        Ok(Self {
            dir,
            seq: AtomicU64::new(0),
        })
    }

    fn path_for(&self, session: &SmtpSession) -> PathBuf {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!("{timestamp}_{}_{seq}.eml", session.id))
    }
}

/// Prefixes the message with the envelope, the way it was received.
fn render(message: &[u8], session: &SmtpSession) -> Vec<u8> {
    let mut content = String::new();
    if let Some(mail_from) = &session.mail_from {
        content.push_str(&format!("X-Envelope-From: <{}>\r\n", mail_from));
    }
    for rcpt in &session.rcpt_to {
        content.push_str(&format!("X-Envelope-To: <{}>\r\n", rcpt));
    }
    content.push_str(&format!("X-Client: {}", session.client_addr));
    if let Some(domain) = &session.domain {
        content.push_str(&format!(" ({})", domain));
    }
    if let Some(tls) = &session.tls {
        content.push_str(&format!(" with {} {}", tls.version, tls.cipher));
    }
    content.push_str("\r\n");

    let mut out = content.into_bytes();
    out.extend_from_slice(message);
    out.extend_from_slice(b"\r\n");
    out
}

#[async_trait]
impl Policy for Maildrop {
    async fn on_data(&self, message: &[u8], session: &SmtpSession) -> Result<Verdict> {
        let path = self.path_for(session);
        if let Err(e) = tokio::fs::write(&path, render(message, session)).await {
            tracing::error!(?path, error = %e, "failed to save message");
            return Ok(Verdict::Reject(Response::local_error()));
        }
        tracing::info!(?path, "message saved");
        Ok(Verdict::Accept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starttls_smtpd::SessionId;

    fn session() -> SmtpSession {
        let mut s = SmtpSession::new("198.51.100.4:5555".parse().unwrap());
        s.domain = Some("client.example".into());
        s.mail_from = Some("u@a.com".into());
        s.rcpt_to = vec!["v@b.com".into(), "w@b.com".into()];
        s
    }

    #[test]
    fn test_render_headers() {
        let out = render(b"Subject: hi\r\n\r\nbody", &session());
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(
            "X-Envelope-From: <u@a.com>\r\n\
             X-Envelope-To: <v@b.com>\r\n\
             X-Envelope-To: <w@b.com>\r\n\
             X-Client: 198.51.100.4:5555 (client.example)\r\n\
             Subject: hi\r\n"
        ));
        assert!(text.ends_with("body\r\n"));
    }

    #[tokio::test]
    async fn test_writes_file() {
        let dir = std::env::temp_dir().join(format!("maildrop-{}", SessionId::random()));
        let maildrop = Maildrop::new(dir.clone()).unwrap();
        let s = session();
        assert_eq!(maildrop.on_data(b"hello", &s).await.unwrap(), Verdict::Accept);

        let files: Vec<_> = std::fs::read_dir(&dir).unwrap().collect();
        assert_eq!(files.len(), 1);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unwritable_dir_is_transient_failure() {
        let dir = std::env::temp_dir().join(format!("maildrop-{}", SessionId::random()));
        let maildrop = Maildrop::new(dir.clone()).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();
        let verdict = maildrop.on_data(b"hello", &session()).await.unwrap();
        assert_eq!(verdict, Verdict::Reject(Response::local_error()));
    }
}
