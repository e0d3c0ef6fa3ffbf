//! Server configuration. Built once at startup and never mutated.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether MAIL demands a completed STARTTLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartTlsPolicy {
    /// MAIL is refused until TLS is negotiated, even if TLS is not configured.
    Required,
    /// MAIL requires TLS only when the server offers it.
    #[default]
    Opportunistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TLSV1.2" | "1.2" => Ok(Self::Tls12),
            "TLSV1.3" | "1.3" => Ok(Self::Tls13),
            _ => Err(Error::Config(format!("unsupported TLS version: {s}"))),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tls12 => f.write_str("TLSv1.2"),
            Self::Tls13 => f.write_str("TLSv1.3"),
        }
    }
}

/// TLS material and handshake options.
#[derive(Debug, Clone)]
pub struct TlsOptions {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key (PKCS#8, or PKCS#1 RSA).
    pub key: PathBuf,
    pub handshake_timeout: Duration,
    pub min_version: TlsVersion,
    pub max_version: TlsVersion,
    pub alpn: Vec<String>,
}

impl TlsOptions {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            min_version: TlsVersion::Tls12,
            max_version: TlsVersion::Tls13,
            alpn: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Host name used in the banner and the EHLO reply.
    pub greeting: String,
    /// Extensions advertised after SIZE once the channel is acceptable.
    pub extensions: Vec<String>,
    pub max_message_size: usize,
    pub max_unknown_commands: usize,
    /// Idle limit while waiting for a command.
    pub connection_timeout: Duration,
    /// Idle limit between chunks of a message body.
    pub data_timeout: Duration,
    pub max_connections: usize,
    pub starttls_policy: StartTlsPolicy,
    pub tls: Option<TlsOptions>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            greeting: "localhost".to_string(),
            extensions: vec![
                "ENHANCEDSTATUSCODES".to_string(),
                "PIPELINING".to_string(),
                "8BITMIME".to_string(),
            ],
            max_message_size: 10 * 1024 * 1024,
            max_unknown_commands: 3,
            connection_timeout: Duration::from_secs(60),
            data_timeout: Duration::from_secs(5 * 60),
            max_connections: 10,
            starttls_policy: StartTlsPolicy::default(),
            tls: None,
        }
    }
}

impl Config {
    /// Whether `name` is among the advertised extensions (case-insensitive).
    pub fn advertises(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| {
            e.split_whitespace()
                .next()
                .is_some_and(|keyword| keyword.eq_ignore_ascii_case(name))
        })
    }
}
