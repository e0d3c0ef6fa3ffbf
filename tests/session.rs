mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{drain, start};
use starttls_smtpd::{
    Config, Context, EnhancedCode, Event, MailParams, Policy, Response, SmtpSession, State, Verdict,
};

fn plain() -> Context {
    Context::new(Config::default()).unwrap()
}

#[tokio::test]
async fn test_plain_transaction() {
    let mut h = start(plain()).await;
    let c = &mut h.client;

    let ehlo = c.expect("EHLO client.example.org", "250 ").await;
    assert_eq!(
        ehlo,
        [
            "250-localhost Hello, client.example.org",
            "250-SIZE 10485760",
            "250-ENHANCEDSTATUSCODES",
            "250-PIPELINING",
            "250 8BITMIME",
        ]
    );
    c.expect("MAIL FROM:<u@a.com>", "250 2.1.0 Originator <u@a.com> ok").await;
    c.expect("RCPT TO:<v@b.com>", "250 2.1.5 Destination address valid").await;
    c.expect("DATA", "354 Start mail input; end with <CRLF>.<CRLF>").await;
    c.send_raw(b"Subject: test\r\n\r\n..stuffed\r\nplain\r\n.\r\n").await;
    assert_eq!(c.last_line().await, "250 2.6.0 Message accepted");
    c.expect("QUIT", "221 2.0.0 BYE").await;
    assert!(c.is_closed().await);

    let session = h.session.await.unwrap();
    assert_eq!(session.state, State::DataDone);
    assert_eq!(session.mail_from.as_deref(), Some("u@a.com"));

    let events = drain(&mut h.events).await;
    let names: Vec<_> = events.iter().map(Event::name).collect();
    assert_eq!(names, ["CONNECT", "EHLO", "MAIL", "RCPT", "DATA", "DISCONNECT"]);
    let message = events.iter().find_map(|e| match e {
        Event::Data { message, .. } => Some(message.clone()),
        _ => None,
    });
    assert_eq!(message.as_deref(), Some(&b"Subject: test\r\n\r\n.stuffed\r\nplain"[..]));
}

#[tokio::test]
async fn test_replies_before_ehlo_have_no_enhanced_code() {
    let mut h = start(plain()).await;
    h.client.expect("MAIL FROM:<u@a.com>", "503 Bad sequence of commands").await;
    h.client.expect("EHLO client.example.org", "250 ").await;
    h.client.expect("RCPT TO:<v@b.com>", "503 5.5.1 Bad sequence of commands").await;
}

#[tokio::test]
async fn test_empty_message() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("MAIL FROM:<>", "250 ").await;
    c.expect("RCPT TO:<postmaster@b.com>", "250 ").await;
    c.expect("DATA", "354 ").await;
    c.send_raw(b".\r\n").await;
    assert_eq!(c.last_line().await, "250 2.6.0 Message accepted");
}

#[tokio::test]
async fn test_sequence_errors_leave_state() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("RCPT TO:<v@b.com>", "503 5.5.1").await;
    c.expect("DATA", "503 5.5.1").await;
    c.expect("STARTTLS", "454 4.7.0 TLS not available").await;
    c.expect("EHLO client.example.org", "503 5.5.1").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
    c.expect("DATA", "503 5.5.1").await;
    c.expect("RCPT TO:<v@b.com>", "250 ").await;
    c.expect("QUIT", "221").await;
    assert_eq!(h.session.await.unwrap().state, State::RcptTo);
}

#[tokio::test]
async fn test_rset_then_new_transaction_without_ehlo() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
    c.expect("RCPT TO:<v@b.com>", "250 ").await;
    c.expect("RSET", "250 2.0.0 OK").await;
    c.expect("RCPT TO:<v@b.com>", "503 5.5.1").await;
    c.expect("MAIL FROM:<x@a.com>", "250 2.1.0 Originator <x@a.com> ok").await;
    c.expect("QUIT", "221").await;

    let session = h.session.await.unwrap();
    assert_eq!(session.mail_from.as_deref(), Some("x@a.com"));
    assert!(session.rcpt_to.is_empty());
}

#[tokio::test]
async fn test_rset_after_message() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
    c.expect("RCPT TO:<v@b.com>", "250 ").await;
    c.expect("DATA", "354 ").await;
    c.send_raw(b"one\r\n.\r\n").await;
    c.last_line().await;
    c.expect("MAIL FROM:<u@a.com>", "503 5.5.1").await;
    c.expect("RSET", "250 ").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
}

#[tokio::test]
async fn test_pipelined_commands() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.send_raw(b"MAIL FROM:<u@a.com>\r\nRCPT TO:<v@b.com>\r\nRCPT TO:<w@b.com>\r\nDATA\r\n")
        .await;
    assert!(c.last_line().await.starts_with("250 2.1.0"));
    assert!(c.last_line().await.starts_with("250 2.1.5"));
    assert!(c.last_line().await.starts_with("250 2.1.5"));
    assert!(c.last_line().await.starts_with("354 "));
    c.send_raw(b"body\r\n.\r\nQUIT\r\n").await;
    assert!(c.last_line().await.starts_with("250 2.6.0"));
    assert!(c.last_line().await.starts_with("221 "));

    let session = h.session.await.unwrap();
    assert_eq!(session.rcpt_to, ["v@b.com", "w@b.com"]);
}

#[tokio::test]
async fn test_oversized_message_then_retry() {
    let config = Config {
        max_message_size: 64,
        ..Config::default()
    };
    let mut h = start(Context::new(config).unwrap()).await;
    let c = &mut h.client;
    let ehlo = c.expect("EHLO client.example.org", "250 ").await;
    assert!(ehlo.contains(&"250-SIZE 64".to_string()));
    c.expect("MAIL FROM:<u@a.com> SIZE=65", "552 5.3.4").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
    c.expect("RCPT TO:<v@b.com>", "250 ").await;

    // Terminator in the same chunk as the overflow.
    c.expect("DATA", "354 ").await;
    c.send_raw(format!("{}\r\n.\r\n", "x".repeat(100)).as_bytes()).await;
    assert_eq!(c.last_line().await, "552 5.3.4 Message too big for system");

    // Overflow first, terminator later: the rest of the body is swallowed.
    c.expect("DATA", "354 ").await;
    c.send_raw("y".repeat(100).as_bytes()).await;
    assert_eq!(c.last_line().await, "552 5.3.4 Message too big for system");
    c.send_raw(b"MAIL FROM:<not@a.command>\r\n.\r\n").await;

    c.expect("DATA", "354 ").await;
    c.send_raw(b"small\r\n.\r\n").await;
    assert_eq!(c.last_line().await, "250 2.6.0 Message accepted");
    c.expect("QUIT", "221").await;

    let session = h.session.await.unwrap();
    assert_eq!(session.state, State::DataDone);
    assert_eq!(session.mail_from.as_deref(), Some("u@a.com"));
}

#[tokio::test]
async fn test_unknown_command_ceiling() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("XYZZY", "500 5.5.2 Unknown command").await;
    c.expect("NOOP", "502 5.5.1 Command not implemented").await;
    c.expect("HELO client.example.org", "421 4.7.0 Too many unknown commands").await;
    assert!(c.is_closed().await);

    let names: Vec<_> = drain(&mut h.events).await.iter().map(Event::name).collect();
    assert_eq!(names.iter().filter(|n| **n == "DISCONNECT").count(), 1);
}

#[tokio::test]
async fn test_known_command_resets_unknown_count() {
    let mut h = start(plain()).await;
    let c = &mut h.client;
    c.expect("FOO", "500").await;
    c.expect("BAR", "500").await;
    c.expect("RSET", "250").await;
    c.expect("FOO", "500").await;
    c.expect("BAR", "500").await;
    c.expect("QUIT", "221").await;
}

#[tokio::test]
async fn test_data_timeout() {
    let config = Config {
        data_timeout: Duration::from_millis(100),
        ..Config::default()
    };
    let mut h = start(Context::new(config).unwrap()).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
    c.expect("RCPT TO:<v@b.com>", "250 ").await;
    c.expect("DATA", "354 ").await;
    c.send_raw(b"partial body\r\n").await;
    assert_eq!(c.last_line().await, "451 4.4.2 Connection timed out");
    assert!(c.is_closed().await);
    assert_eq!(h.session.await.unwrap().state, State::RcptTo);
}

#[derive(Default)]
struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

#[derive(Default, Clone)]
struct Recorder(Arc<Counters>);

#[async_trait]
impl Policy for Recorder {
    async fn on_connect(&self, _: &SmtpSession) {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
    }

    async fn on_mail_from(&self, address: &str, _: &SmtpSession, params: &MailParams) -> anyhow::Result<Verdict> {
        match address {
            "broken@a.com" => anyhow::bail!("sender database offline"),
            _ if params.size == Some(1) => Ok(Verdict::AcceptWith(Response::new(
                250,
                EnhancedCode::SENDER_OK,
                "tiny message expected",
            ))),
            _ => Ok(Verdict::Accept),
        }
    }

    async fn on_rcpt_to(&self, address: &str, _: &SmtpSession) -> anyhow::Result<Verdict> {
        if address.starts_with("nobody@") {
            return Ok(Verdict::Reject(Response::new(550, EnhancedCode(5, 1, 1), "No such user")));
        }
        Ok(Verdict::Accept)
    }

    async fn on_data(&self, message: &[u8], session: &SmtpSession) -> anyhow::Result<Verdict> {
        assert_eq!(session.rcpt_to.len(), 1);
        Ok(Verdict::AcceptWith(Response::new(
            250,
            EnhancedCode::MESSAGE_ACCEPTED,
            format!("queued {} bytes", message.len()),
        )))
    }

    async fn on_disconnect(&self, _: &SmtpSession) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn test_policy_hooks() {
    let recorder = Recorder::default();
    let mut h = start(plain().with_policy(recorder.clone())).await;
    let c = &mut h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("MAIL FROM:<broken@a.com>", "451 4.3.0").await;
    c.expect("MAIL FROM:<u@a.com> SIZE=1", "250 2.1.0 tiny message expected").await;
    c.expect("RCPT TO:<nobody@b.com>", "550 5.1.1 No such user").await;
    c.expect("DATA", "503 5.5.1").await;
    c.expect("RCPT TO:<v@b.com>", "250 ").await;
    c.expect("DATA", "354 ").await;
    c.send_raw(b"12345\r\n.\r\n").await;
    assert_eq!(c.last_line().await, "250 2.6.0 queued 5 bytes");
    c.expect("QUIT", "221").await;
    h.session.await.unwrap();

    assert_eq!(recorder.0.connects.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.0.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_client_disconnect_mid_transaction() {
    let recorder = Recorder::default();
    let h = start(plain().with_policy(recorder.clone())).await;
    let mut c = h.client;
    c.expect("EHLO client.example.org", "250 ").await;
    c.expect("MAIL FROM:<u@a.com>", "250 ").await;
    drop(c);

    let session = h.session.await.unwrap();
    assert_eq!(session.state, State::MailFrom);
    assert_eq!(recorder.0.disconnects.load(Ordering::SeqCst), 1);
}
