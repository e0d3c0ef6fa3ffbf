//! Read-only state shared by every connection of a server.

use std::sync::Arc;
use std::time::Duration;

use tokio_rustls::TlsAcceptor;

use crate::command::Registry;
use crate::config::{Config, StartTlsPolicy, DEFAULT_HANDSHAKE_TIMEOUT};
use crate::error::Result;
use crate::events::EventBus;
use crate::policy::{AcceptAll, Policy};

pub struct Context {
    pub config: Config,
    /// Present when STARTTLS is offered.
    pub tls: Option<TlsAcceptor>,
    pub policy: Arc<dyn Policy>,
    pub events: EventBus,
    pub commands: Registry,
}

impl Context {
    /// Builds the context, loading TLS material if `config.tls` is set.
    ///
    /// # Errors
    ///
    /// Fails if the certificate or key cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        let tls = config.tls.as_ref().map(crate::tls::acceptor).transpose()?;
        Ok(Self {
            config,
            tls,
            policy: Arc::new(AcceptAll),
            events: EventBus::default(),
            commands: Registry::standard(),
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    #[must_use]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    #[must_use]
    pub fn with_commands(mut self, commands: Registry) -> Self {
        self.commands = commands;
        self
    }

    pub fn offers_tls(&self) -> bool {
        self.tls.is_some()
    }

    pub fn handshake_timeout(&self) -> Duration {
        self.config
            .tls
            .as_ref()
            .map_or(DEFAULT_HANDSHAKE_TIMEOUT, |tls| tls.handshake_timeout)
    }

    /// Whether MAIL must wait for a negotiated TLS channel.
    pub fn requires_tls(&self) -> bool {
        match self.config.starttls_policy {
            StartTlsPolicy::Required => true,
            StartTlsPolicy::Opportunistic => self.offers_tls(),
        }
    }
}
