//! The connection's single transport handle, and its in-place TLS upgrade.

use std::io;
use std::time::Duration;

use bytes::BytesMut;
use rustls::{ProtocolVersion, ServerConnection};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use crate::error::{Error, Result};
use crate::session::TlsInfo;

/// Plaintext or TLS stream. `Detached` is the state after a failed upgrade
/// or a close; every I/O on it fails, so a connection can never fall back
/// to plaintext once the upgrade has started.
pub enum Transport<S> {
    Plain(S),
    Tls(Box<TlsStream<S>>),
    Detached,
}

impl<S> Transport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn is_secure(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    pub async fn read_buf(&mut self, buf: &mut BytesMut) -> Result<usize> {
        let n = match self {
            Self::Plain(s) => s.read_buf(buf).await?,
            Self::Tls(s) => s.read_buf(buf).await?,
            Self::Detached => return Err(Error::Closed),
        };
        Ok(n)
    }

    /// Writes and flushes, so the peer has the bytes when this returns.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        match self {
            Self::Plain(s) => {
                s.write_all(data).await?;
                s.flush().await?;
            }
            Self::Tls(s) => {
                s.write_all(data).await?;
                s.flush().await?;
            }
            Self::Detached => return Err(Error::Closed),
        }
        Ok(())
    }

    /// Closes the write side and detaches. Safe to call more than once.
    pub async fn shutdown(&mut self) {
        match std::mem::replace(self, Self::Detached) {
            Self::Plain(mut s) => {
                let _ = s.shutdown().await;
            }
            Self::Tls(mut s) => {
                let _ = s.shutdown().await;
            }
            Self::Detached => {}
        }
    }

    /// Runs the server handshake over the plaintext stream and swaps the
    /// TLS stream into place. On failure the transport stays detached.
    ///
    /// # Errors
    ///
    /// [`Error::HandshakeTimeout`] if the handshake exceeds `timeout`,
    /// [`Error::Handshake`] if it fails or the transport is not plaintext.
    pub async fn upgrade(&mut self, acceptor: &TlsAcceptor, timeout: Duration) -> Result<TlsInfo> {
        let plain = match std::mem::replace(self, Self::Detached) {
            Self::Plain(s) => s,
            other => {
                *self = other;
                return Err(Error::Handshake(io::Error::other("transport is not plaintext")));
            }
        };

        let stream = match tokio::time::timeout(timeout, acceptor.accept(plain)).await {
            Err(_) => return Err(Error::HandshakeTimeout),
            Ok(Err(e)) => return Err(Error::Handshake(e)),
            Ok(Ok(stream)) => stream,
        };

        let info = negotiated(stream.get_ref().1);
        *self = Self::Tls(Box::new(stream));
        Ok(info)
    }
}

fn negotiated(conn: &ServerConnection) -> TlsInfo {
    let version = match conn.protocol_version() {
        Some(ProtocolVersion::TLSv1_2) => "TLSv1.2".to_string(),
        Some(ProtocolVersion::TLSv1_3) => "TLSv1.3".to_string(),
        Some(other) => format!("{other:?}"),
        None => String::new(),
    };
    let cipher = conn
        .negotiated_cipher_suite()
        .map(|s| format!("{:?}", s.suite()))
        .unwrap_or_default();
    TlsInfo {
        version,
        cipher,
        peer_certificate: conn.peer_certificates().is_some_and(|c| !c.is_empty()),
    }
}
