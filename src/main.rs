mod maildrop;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use structopt::StructOpt;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinSet;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

use starttls_smtpd::{Config, Context, Event, Server, StartTlsPolicy, TlsOptions, TlsVersion};

use crate::maildrop::Maildrop;

#[derive(Debug, StructOpt, Clone)]
#[structopt(
    name = "starttls-smtpd",
    about = "SMTP server with ESMTP extensions and STARTTLS",
    author = "2026, Philippe TEMESI <https://www.tems.be>",
    version = "0.1.0"
)]
pub struct Opt {
    /// Listening ports (can be specified multiple times, default: 25)
    #[structopt(short = "p", long = "port", default_value = "25", number_of_values = 1)]
    pub ports: Vec<u16>,

    /// Listening address (default: 0.0.0.0)
    #[structopt(short = "a", long = "address", default_value = "0.0.0.0")]
    pub address: String,

    /// Host name used in the banner and EHLO reply
    #[structopt(long = "greeting", default_value = "localhost")]
    pub greeting: String,

    /// Additional extension to advertise, e.g. SMTPUTF8 (can be specified multiple times)
    #[structopt(long = "extension", number_of_values = 1)]
    pub extensions: Vec<String>,

    /// Maximum message size in bytes
    #[structopt(long = "max-message-size", default_value = "10485760")]
    pub max_message_size: usize,

    /// Unknown commands tolerated before the connection is closed
    #[structopt(long = "max-unknown-commands", default_value = "3")]
    pub max_unknown_commands: usize,

    /// Idle timeout in seconds while waiting for a command
    #[structopt(long = "timeout", default_value = "60")]
    pub timeout: u64,

    /// Idle timeout in seconds while receiving a message
    #[structopt(long = "data-timeout", default_value = "300")]
    pub data_timeout: u64,

    /// Maximum concurrent connections
    #[structopt(long = "max-connections", default_value = "10")]
    pub max_connections: usize,

    /// TLS certificate file (PEM)
    #[structopt(long = "tls-cert", parse(from_os_str))]
    pub tls_cert: Option<PathBuf>,

    /// TLS private key file (PEM)
    #[structopt(long = "tls-key", parse(from_os_str))]
    pub tls_key: Option<PathBuf>,

    /// TLS handshake timeout in seconds
    #[structopt(long = "tls-handshake-timeout", default_value = "5")]
    pub tls_handshake_timeout: u64,

    /// Lowest accepted TLS version (TLSv1.2 or TLSv1.3)
    #[structopt(long = "tls-min-version", default_value = "TLSv1.2")]
    pub tls_min_version: TlsVersion,

    /// Highest accepted TLS version (TLSv1.2 or TLSv1.3)
    #[structopt(long = "tls-max-version", default_value = "TLSv1.3")]
    pub tls_max_version: TlsVersion,

    /// ALPN protocol to offer (can be specified multiple times)
    #[structopt(long = "alpn", number_of_values = 1)]
    pub alpn: Vec<String>,

    /// Refuse MAIL until STARTTLS has completed, even when TLS is not configured
    #[structopt(long = "require-starttls")]
    pub require_starttls: bool,

    /// Directory to save accepted messages
    #[structopt(long = "data", parse(from_os_str))]
    pub data_dir: Option<PathBuf>,

    /// Verbose mode - log the SMTP dialogue
    #[structopt(short = "v", long = "verbose")]
    pub verbose: bool,
}

impl Opt {
    fn config(&self) -> Result<Config> {
        let tls = match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => {
                let mut tls = TlsOptions::new(cert, key);
                tls.handshake_timeout = Duration::from_secs(self.tls_handshake_timeout);
                tls.min_version = self.tls_min_version;
                tls.max_version = self.tls_max_version;
                tls.alpn = self.alpn.clone();
                Some(tls)
            }
            (None, None) => None,
            _ => anyhow::bail!("--tls-cert and --tls-key must be given together"),
        };

        let mut config = Config {
            greeting: self.greeting.clone(),
            max_message_size: self.max_message_size,
            max_unknown_commands: self.max_unknown_commands,
            connection_timeout: Duration::from_secs(self.timeout),
            data_timeout: Duration::from_secs(self.data_timeout),
            max_connections: self.max_connections,
            tls,
            ..Config::default()
        };
        for ext in &self.extensions {
            if !config.advertises(ext) {
                config.extensions.push(ext.to_ascii_uppercase());
            }
        }
        if self.require_starttls {
            config.starttls_policy = StartTlsPolicy::Required;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(false)
        .init();
}

/// Logs the event stream, one line per event.
fn log_events(mut events: broadcast::Receiver<Event>) {
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event log lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let session = event.session();
            match &event {
                Event::Ehlo { domain, .. } => {
                    tracing::info!(session = %session.id, %domain, "{}", event.name());
                }
                Event::Mail { address, params, .. } => {
                    tracing::info!(session = %session.id, from = %address, ?params, "{}", event.name());
                }
                Event::Rcpt { address, .. } => {
                    tracing::info!(session = %session.id, to = %address, "{}", event.name());
                }
                Event::Data { message, .. } => {
                    tracing::info!(session = %session.id, size = message.len(), "{}", event.name());
                }
                _ => tracing::info!(session = %session.id, client = %session.client_addr, "{}", event.name()),
            }
        }
    });
}

async fn wait_for_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();
    init_logging(opt.verbose);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "starting");

    let config = opt.config()?;
    let mut cx = Context::new(config).context("Failed to initialise server")?;
    if let Some(dir) = &opt.data_dir {
        cx = cx.with_policy(Maildrop::new(dir.clone())?);
    }
    let server = Arc::new(Server::from_context(cx));
    log_events(server.events());

    let mut listeners = JoinSet::new();
    for port in &opt.ports {
        let addr = format!("{}:{}", opt.address, port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        let server = server.clone();
        listeners.spawn(async move { server.serve(listener).await });
    }

    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => shutdown.trigger(),
            Err(e) => tracing::error!(error = %e, "cannot install signal handlers"),
        }
    });

    while let Some(res) = listeners.join_next().await {
        res.context("listener task failed")??;
    }
    Ok(())
}
