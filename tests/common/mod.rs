#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use starttls_smtpd::{Config, Connection, Context, Event, SmtpSession, TlsOptions};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_rustls::{client, TlsConnector};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub fn fixture(name: &str) -> String {
    format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"))
}

pub fn tls_config() -> Config {
    Config {
        tls: Some(TlsOptions::new(fixture("server.pem"), fixture("server.key"))),
        ..Config::default()
    }
}

/// Line-oriented SMTP client used to drive a connection in tests.
pub struct Client<S> {
    io: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    pub fn new(stream: S) -> Self {
        Self {
            io: BufReader::new(stream),
        }
    }

    pub async fn send_raw(&mut self, data: &[u8]) {
        self.io.write_all(data).await.unwrap();
        self.io.flush().await.unwrap();
    }

    pub async fn send(&mut self, line: &str) {
        self.send_raw(format!("{line}\r\n").as_bytes()).await;
    }

    /// Reads one (possibly multi-line) reply, CRLF stripped.
    pub async fn reply(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let n = tokio::time::timeout(READ_TIMEOUT, self.io.read_line(&mut line))
                .await
                .expect("timed out waiting for a reply")
                .unwrap();
            assert!(n > 0, "connection closed while waiting for a reply (got {lines:?})");
            assert!(line.ends_with("\r\n"), "reply line without CRLF: {line:?}");
            let line = line.trim_end_matches("\r\n").to_string();
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    pub async fn last_line(&mut self) -> String {
        self.reply().await.pop().unwrap()
    }

    /// Sends a command and asserts the reply starts with `expected`.
    pub async fn expect(&mut self, line: &str, expected: &str) -> Vec<String> {
        self.send(line).await;
        let reply = self.reply().await;
        let last = reply.last().unwrap();
        assert!(last.starts_with(expected), "{line:?}: expected {expected:?}, got {reply:?}");
        reply
    }

    pub async fn is_closed(&mut self) -> bool {
        let mut line = String::new();
        match tokio::time::timeout(READ_TIMEOUT, self.io.read_line(&mut line)).await {
            Ok(Ok(0)) | Ok(Err(_)) => true,
            _ => false,
        }
    }

    pub fn into_inner(self) -> S {
        assert!(self.io.buffer().is_empty(), "unread bytes before TLS upgrade");
        self.io.into_inner()
    }
}

pub struct Harness {
    pub client: Client<DuplexStream>,
    pub session: JoinHandle<SmtpSession>,
    pub shutdown: watch::Sender<bool>,
    pub events: broadcast::Receiver<Event>,
}

/// Runs a connection over an in-memory pipe and reads the banner.
pub async fn start(cx: Context) -> Harness {
    let (server, client) = tokio::io::duplex(256 * 1024);
    let (shutdown, rx) = watch::channel(false);
    let events = cx.events.subscribe();
    let conn = Connection::new(server, "203.0.113.9:52000".parse().unwrap(), Arc::new(cx), rx);
    let session = tokio::spawn(conn.run());

    let mut client = Client::new(client);
    assert_eq!(client.last_line().await, "220 localhost ESMTP");
    Harness {
        client,
        session,
        shutdown,
        events,
    }
}

pub fn connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let pem = std::fs::read(fixture("ca.pem")).unwrap();
    for der in rustls_pemfile::certs(&mut &pem[..]).unwrap() {
        roots.add(&Certificate(der)).unwrap();
    }
    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Runs the client side of the handshake after `220 Ready to start TLS`.
pub async fn upgrade(client: Client<DuplexStream>) -> Client<client::TlsStream<DuplexStream>> {
    let stream = client.into_inner();
    let name = ServerName::try_from("localhost").unwrap();
    let tls = connector().connect(name, stream).await.unwrap();
    Client::new(tls)
}

/// Collects every event already emitted, up to the first DISCONNECT.
pub async fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut out = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(READ_TIMEOUT, events.recv()).await {
        let done = matches!(event, Event::Disconnect { .. });
        out.push(event);
        if done {
            break;
        }
    }
    out
}
