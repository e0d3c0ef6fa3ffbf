//! Error types for the SMTP engine.

use std::io;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by a policy hook.
pub type HookError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid or unreadable configuration (certificates, keys, versions).
    #[error("configuration error: {0}")]
    Config(String),

    /// A policy hook failed without supplying a response.
    #[error("policy hook failed: {0}")]
    Hook(#[source] HookError),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("TLS handshake timed out")]
    HandshakeTimeout,

    /// The transport was used after a failed upgrade or a close.
    #[error("connection closed")]
    Closed,
}

impl Error {
    pub(crate) fn hook(err: anyhow::Error) -> Self {
        Self::Hook(err.into())
    }
}
