//! Listener loop with a connection ceiling and graceful shutdown.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, watch, Semaphore};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::connection::Connection;
use crate::context::Context;
use crate::error::Result;
use crate::events::Event;

const TOO_MANY_CONNECTIONS: &[u8] = b"421 4.7.0 Too many connections, try again later\r\n";

/// Cloneable handle that asks a server and all of its sessions to stop.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Requests shutdown. Calling it again has no further effect.
    pub fn trigger(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("shutdown requested");
        }
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Accepts SMTP clients. One server may serve several listeners; the
/// connection ceiling is shared between them.
pub struct Server {
    cx: Arc<Context>,
    shutdown: Shutdown,
    limit: Arc<Semaphore>,
}

impl Server {
    /// # Errors
    ///
    /// Fails if the configured TLS material cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        Ok(Self::from_context(Context::new(config)?))
    }

    /// Builds a server around a prepared context, for instance one carrying
    /// a custom policy or command registry.
    pub fn from_context(cx: Context) -> Self {
        let (tx, _) = watch::channel(false);
        let limit = Arc::new(Semaphore::new(cx.config.max_connections));
        Self {
            cx: Arc::new(cx),
            shutdown: Shutdown { tx: Arc::new(tx) },
            limit,
        }
    }

    pub fn context(&self) -> &Context {
        &self.cx
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.cx.events.subscribe()
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Accepts connections until shutdown, then waits for every session
    /// to finish.
    ///
    /// # Errors
    ///
    /// Returns an error only if the listener's local address is unavailable.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        tracing::info!(%local, "listening");

        let mut stop = self.shutdown.tx.subscribe();
        let mut sessions = JoinSet::new();

        loop {
            tokio::select! {
                res = stop.wait_for(|stopped| *stopped) => {
                    if res.is_ok() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, client_addr)) => {
                        let Ok(permit) = self.limit.clone().try_acquire_owned() else {
                            tracing::warn!(%client_addr, "connection limit reached");
                            sessions.spawn(refuse(stream));
                            continue;
                        };
                        let conn = Connection::new(stream, client_addr, self.cx.clone(), self.shutdown.tx.subscribe());
                        sessions.spawn(async move {
                            conn.run().await;
                            drop(permit);
                        });
                    }
                    Err(e) => tracing::error!(%local, error = %e, "accept failed"),
                },
                // Reap finished sessions so the set does not grow.
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }

        drop(listener);
        tracing::info!(remaining = sessions.len(), "waiting for sessions to close");
        while let Some(res) = sessions.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "session task failed");
            }
        }
        tracing::info!(%local, "server stopped");
        Ok(())
    }
}

async fn refuse(mut stream: TcpStream) {
    let _ = stream.write_all(TOO_MANY_CONNECTIONS).await;
    let _ = stream.shutdown().await;
}
