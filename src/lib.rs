//! Server side of SMTP (RFC 5321) with ESMTP extensions and STARTTLS.
//!
//! A [`Server`] accepts TCP connections and runs one [`Connection`] per
//! client. Integrators plug in a [`Policy`] to accept or refuse each
//! protocol step and may observe the [`Event`] stream.

pub mod address;
pub mod command;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod events;
pub mod framer;
pub mod handlers;
pub mod policy;
pub mod response;
pub mod server;
pub mod session;
pub mod state;
pub mod tls;
pub mod transport;
pub mod utils;

pub use command::{Command, Outcome, Registry, Verb};
pub use config::{Config, StartTlsPolicy, TlsOptions, TlsVersion};
pub use connection::Connection;
pub use context::Context;
pub use error::{Error, Result};
pub use events::{Event, EventBus};
pub use handlers::mail::{Body, MailParams};
pub use policy::{AcceptAll, Policy, Verdict};
pub use response::{EnhancedCode, Reply, Response};
pub use server::{Server, Shutdown};
pub use session::{SessionId, SmtpSession, TlsInfo};
pub use state::State;
