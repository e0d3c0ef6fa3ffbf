//! Per-connection driver: owns the transport, splits inbound bytes into
//! command lines or message data, and runs one command at a time.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tracing::Instrument;

use crate::command::Outcome;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::events::Event;
use crate::framer::{DataFramer, Frame};
use crate::handlers::data;
use crate::response::{EnhancedCode, Reply, Response};
use crate::session::SmtpSession;
use crate::state::State;
use crate::transport::Transport;
use crate::utils::escape_for_log;

/// Longest command line accepted, CRLF included (RFC 5321 section 4.5.3.1.4).
pub const MAX_LINE_LEN: usize = 512;

const READ_RESERVE: usize = 4 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

enum Line {
    Command(String),
    TooLong,
    Invalid,
}

enum Read {
    Data,
    Eof,
    Idle,
    Shutdown,
}

pub struct Connection<S> {
    transport: Transport<S>,
    buffer: BytesMut,
    session: SmtpSession,
    cx: Arc<Context>,
    shutdown: watch::Receiver<bool>,
    /// Present while a message body is being received.
    framer: Option<DataFramer>,
    /// Set after an overlong line until its LF shows up.
    discarding: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, client_addr: SocketAddr, cx: Arc<Context>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            transport: Transport::Plain(stream),
            buffer: BytesMut::with_capacity(READ_RESERVE),
            session: SmtpSession::new(client_addr),
            cx,
            shutdown,
            framer: None,
            discarding: false,
        }
    }

    pub fn session(&self) -> &SmtpSession {
        &self.session
    }

    /// Runs the session until it ends and returns its final state. The
    /// disconnect hook and event fire exactly once, whatever the cause.
    pub async fn run(mut self) -> SmtpSession {
        let span = tracing::info_span!(
            "session",
            id = %self.session.id,
            client = %self.session.client_addr
        );
        async move {
            match self.serve().await {
                Ok(()) => {}
                Err(Error::Closed) => tracing::debug!("transport already closed"),
                Err(Error::Io(e)) => tracing::debug!(error = %e, "connection lost"),
                Err(e) => tracing::warn!(error = %e, "session failed"),
            }
            self.close().await;
            self.session
        }
        .instrument(span)
        .await
    }

    async fn serve(&mut self) -> Result<()> {
        tracing::info!("connection accepted");
        let banner = format!("220 {} ESMTP\r\n", self.cx.config.greeting);
        self.write_raw(&banner).await?;
        self.session.transition_to(State::GreetingSent);
        self.cx.events.emit(Event::Connect {
            session: self.session.clone(),
        });
        self.cx.policy.on_connect(&self.session).await;

        loop {
            if self.process_buffer().await? == Flow::Close {
                return Ok(());
            }
            match self.read().await? {
                Read::Data => {}
                Read::Eof => {
                    tracing::debug!("client closed the connection");
                    return Ok(());
                }
                Read::Idle => {
                    let response = match self.framer.take() {
                        Some(_) => data::timed_out(&mut self.session),
                        None => Response::new(421, EnhancedCode::TIMEOUT, "Idle timeout, closing connection"),
                    };
                    return self.send(&response.into()).await;
                }
                Read::Shutdown => {
                    let response = Response::new(421, EnhancedCode::TIMEOUT, "Server shutting down");
                    return self.send(&response.into()).await;
                }
            }
        }
    }

    /// Waits for more input, the idle timer or a shutdown request.
    async fn read(&mut self) -> Result<Read> {
        let timeout = if self.framer.is_some() {
            self.cx.config.data_timeout
        } else {
            self.cx.config.connection_timeout
        };
        self.buffer.reserve(READ_RESERVE);

        tokio::select! {
            () = shutdown_requested(&mut self.shutdown) => Ok(Read::Shutdown),
            res = tokio::time::timeout(timeout, self.transport.read_buf(&mut self.buffer)) => match res {
                Err(_) => Ok(Read::Idle),
                Ok(Ok(0)) => Ok(Read::Eof),
                Ok(Ok(_)) => Ok(Read::Data),
                Ok(Err(e)) => Err(e),
            },
        }
    }

    /// Consumes every complete line (or message) currently buffered.
    async fn process_buffer(&mut self) -> Result<Flow> {
        loop {
            if let Some(framer) = self.framer.as_mut() {
                let chunk = self.buffer.split();
                match framer.feed(&chunk) {
                    Frame::Pending => return Ok(Flow::Continue),
                    Frame::TooLarge => {
                        let response = data::too_large(&mut self.session);
                        self.send(&response.into()).await?;
                    }
                    Frame::Discarded { rest } => {
                        self.framer = None;
                        self.buffer = rest;
                    }
                    Frame::Complete { message, rest } => {
                        self.framer = None;
                        self.buffer = rest;
                        let response = data::finish(message, &mut self.session, &self.cx).await;
                        self.send(&response.into()).await?;
                    }
                }
                continue;
            }

            let line = match self.next_line() {
                None => return Ok(Flow::Continue),
                Some(Line::Command(line)) => line,
                Some(Line::TooLong) => {
                    let response = Response::new(500, EnhancedCode::SYNTAX, "Line too long");
                    self.send(&response.into()).await?;
                    continue;
                }
                Some(Line::Invalid) => {
                    self.send(&Response::new(500, EnhancedCode::SYNTAX, "Syntax error").into())
                        .await?;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            tracing::debug!("C: {}", escape_for_log(line.as_bytes()));
            let outcome = self.cx.commands.dispatch(&line, &mut self.session, &self.cx).await;
            if self.apply(outcome).await? == Flow::Close {
                return Ok(Flow::Close);
            }
        }
    }

    async fn apply(&mut self, outcome: Outcome) -> Result<Flow> {
        match outcome {
            Outcome::Reply(reply) => {
                self.send(&reply).await?;
                Ok(Flow::Continue)
            }
            Outcome::Close(reply) => {
                self.send(&reply).await?;
                Ok(Flow::Close)
            }
            Outcome::Data(response) => {
                // Intermediate replies carry no enhanced code (RFC 2034).
                self.write_raw(&response.render(false)).await?;
                self.framer = Some(DataFramer::new(self.cx.config.max_message_size));
                Ok(Flow::Continue)
            }
            Outcome::StartTls(response) => {
                self.send(&response.into()).await?;
                self.starttls().await
            }
        }
    }

    /// Upgrades the transport after `220 Ready to start TLS` was flushed.
    async fn starttls(&mut self) -> Result<Flow> {
        if !self.buffer.is_empty() {
            tracing::warn!(bytes = self.buffer.len(), "discarding plaintext pipelined after STARTTLS");
            self.buffer.clear();
        }
        self.discarding = false;

        let Some(acceptor) = self.cx.tls.as_ref() else {
            return Ok(Flow::Close);
        };
        let timeout = self.cx.handshake_timeout();
        match self.transport.upgrade(acceptor, timeout).await {
            Ok(info) => {
                tracing::info!(version = %info.version, cipher = %info.cipher, "TLS established");
                self.session.secure(info);
                self.cx.events.emit(Event::Secure {
                    session: self.session.clone(),
                });
                if let Err(e) = self.cx.policy.on_secure(&self.session).await {
                    tracing::warn!(error = %e, "secure hook failed");
                }
                Ok(Flow::Continue)
            }
            Err(e) => {
                tracing::warn!(error = %e, "TLS handshake failed");
                Ok(Flow::Close)
            }
        }
    }

    /// Takes the next LF-terminated line off the buffer, CR stripped.
    fn next_line(&mut self) -> Option<Line> {
        loop {
            let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') else {
                if self.buffer.len() > MAX_LINE_LEN {
                    self.buffer.clear();
                    if !self.discarding {
                        self.discarding = true;
                        return Some(Line::TooLong);
                    }
                }
                return None;
            };

            let raw = self.buffer.split_to(pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if raw.len() > MAX_LINE_LEN {
                return Some(Line::TooLong);
            }
            let line = raw[..pos].strip_suffix(b"\r").unwrap_or(&raw[..pos]);
            return Some(match std::str::from_utf8(line) {
                Ok(line) => Line::Command(line.to_string()),
                Err(_) => Line::Invalid,
            });
        }
    }

    async fn send(&mut self, reply: &Reply) -> Result<()> {
        let wire = reply.render(self.session.enhanced_status_codes);
        self.write_raw(&wire).await
    }

    async fn write_raw(&mut self, wire: &str) -> Result<()> {
        tracing::debug!("S: {}", escape_for_log(wire.trim_end().as_bytes()));
        self.transport.write_all(wire.as_bytes()).await
    }

    async fn close(&mut self) {
        self.transport.shutdown().await;
        self.cx.policy.on_disconnect(&self.session).await;
        self.cx.events.emit(Event::Disconnect {
            session: self.session.clone(),
        });
        tracing::info!(state = %self.session.state, "connection closed");
    }
}

/// Resolves once shutdown is signalled. A dropped sender never resolves.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
