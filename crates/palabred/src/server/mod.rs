//! TCP server for the chat relay.
//!
//! The server:
//! - Listens on a TCP socket for client connections
//! - Spawns a ConnectionHandler for each client
//! - Logs the chat events published by the registry
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   ChatServer    │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │   (per client)  │     │                 │
//! └─────────────────┘     └────────┬────────┘
//!                                  │ broadcast
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │  Every session  │
//!                         └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Accept errors are logged and allow continued operation

mod connection;

pub use connection::{ConnectionHandler, DisconnectReason};

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use palabre_core::SessionId;

use crate::config::ServerConfig;
use crate::registry::{ChatEvent, RegistryHandle};
use crate::session::Session;

/// TCP server for the chat relay.
///
/// Accepts clients until the cancellation token fires, then waits a
/// bounded time for connected clients to finish.
pub struct ChatServer {
    /// Bound listener
    listener: TcpListener,

    /// Handle to the chat registry
    registry: RegistryHandle,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Source of session ids, unique for the lifetime of the process
    session_counter: AtomicU64,

    /// Connection tasks still running
    tracker: TaskTracker,

    write_timeout: Duration,
    shutdown_grace: Duration,
}

impl ChatServer {
    /// Binds the listener described by `config`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if the address cannot be bound.
    pub async fn bind(
        config: &ServerConfig,
        registry: RegistryHandle,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: config.listen,
                source,
            })?;

        Ok(Self {
            listener,
            registry,
            cancel_token,
            session_counter: AtomicU64::new(1),
            tracker: TaskTracker::new(),
            write_timeout: config.write_timeout(),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Returns the address actually bound (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::LocalAddr)
    }

    /// Runs the server.
    ///
    /// Accepts connections until the cancellation token is triggered.
    /// This method does not return until shutdown.
    pub async fn run(self) -> Result<(), ServerError> {
        info!(addr = %self.local_addr()?, "Chat server listening");

        // Outlives the accept loop so departures during the grace period are logged
        let logger_stop = CancellationToken::new();
        let logger = tokio::spawn(run_event_logger(
            self.registry.subscribe(),
            logger_stop.clone(),
        ));

        // Accept connections until cancelled
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.handle_connection(stream, peer),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        drop(self.listener);
        self.tracker.close();

        let remaining = self.tracker.len();
        if remaining > 0 {
            info!(
                sessions = remaining,
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Waiting for connected clients"
            );
        }

        if tokio::time::timeout(self.shutdown_grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                sessions = self.tracker.len(),
                "Shutdown grace period elapsed with clients still connected"
            );
        }

        logger_stop.cancel();
        if let Err(e) = logger.await {
            warn!(error = %e, "Event logger task failed");
        }

        info!("Chat server stopped");
        Ok(())
    }

    /// Handles a new client connection by spawning a handler task.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let session_id = SessionId::new(self.session_counter.fetch_add(1, Ordering::Relaxed));
        info!(session_id = %session_id, peer = %peer, "Client connected");

        if let Err(e) = stream.set_nodelay(true) {
            debug!(session_id = %session_id, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let session = Session::new(session_id, Some(peer), reader, writer, self.write_timeout);
        let handler = ConnectionHandler::new(session, self.registry.clone());

        self.tracker.spawn(async move {
            let reason = handler.run().await;
            debug!(session_id = %session_id, reason = %reason, "Connection task finished");
        });
    }
}

/// Logs registry events until `stop` fires or the channel closes.
///
/// Events already queued when `stop` fires are still logged. Returns the
/// number of events logged.
async fn run_event_logger(
    mut event_rx: broadcast::Receiver<ChatEvent>,
    stop: CancellationToken,
) -> usize {
    let mut logged = 0;

    loop {
        tokio::select! {
            biased;

            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        log_event(&event);
                        logged += 1;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Event logger lagged, skipped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                }
            }

            _ = stop.cancelled() => {
                debug!("Event logger shutting down");
                break;
            }
        }
    }

    logged
}

/// Records one chat event.
fn log_event(event: &ChatEvent) {
    match event {
        ChatEvent::Joined { session_id, name } => {
            info!(session_id = %session_id, name = %name, "Join announced");
        }
        ChatEvent::Rejected { session_id, name } => {
            info!(session_id = %session_id, name = %name, "Registration rejected");
        }
        ChatEvent::Message {
            session_id,
            name,
            text,
            delivered,
        } => {
            debug!(
                session_id = %session_id,
                name = %name,
                text = %text,
                delivered = delivered,
                "Message relayed"
            );
        }
        ChatEvent::RecipientUnreachable { session_id, error } => {
            warn!(session_id = %session_id, error = %error, "Recipient unreachable");
        }
        ChatEvent::Left { session_id, name } => {
            info!(session_id = %session_id, name = %name, "Leave announced");
        }
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("Failed to read local address: {0}")]
    LocalAddr(io::Error),
}
