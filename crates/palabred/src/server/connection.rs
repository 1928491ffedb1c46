//! Connection handler for individual chat clients.
//!
//! Each accepted connection gets its own `ConnectionHandler` that:
//! - Reads the requested display name and registers it
//! - Relays every non-empty line to the registry broadcast
//! - Tears the session down exactly once, whatever ended it
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Connection errors are logged and result in graceful disconnect

use std::fmt;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use palabre_core::{DisplayName, SessionState};
use palabre_protocol::{requested_name, ClientLine, ServerMessage};

use crate::registry::{RegisteredSession, RegistryError, RegistryHandle};
use crate::session::{ReadOutcome, Session};

/// Why a session ended.
///
/// Every variant funnels into the same teardown; the reason only changes
/// how the departure is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The client sent `/quit`.
    Quit,

    /// The peer closed its side of the stream.
    PeerClosed,

    /// Reading from the peer failed.
    Io(String),

    /// The first line was blank or missing.
    NoName,

    /// The requested name was already in use.
    Rejected,

    /// A broadcast to this session failed and the registry evicted it.
    Unreachable,

    /// The registry actor is gone (server shutting down).
    RegistryUnavailable,
}

impl DisconnectReason {
    /// Whether the client ended the session on purpose.
    fn is_clean(&self) -> bool {
        matches!(self, Self::Quit | Self::Rejected)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quit => write!(f, "quit"),
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::Io(e) => write!(f, "read failed: {e}"),
            Self::NoName => write!(f, "no display name given"),
            Self::Rejected => write!(f, "display name already in use"),
            Self::Unreachable => write!(f, "unreachable during broadcast"),
            Self::RegistryUnavailable => write!(f, "registry unavailable"),
        }
    }
}

/// Connection handler for a single client.
///
/// Owns the `Session` exclusively; the registry only ever sees the
/// session's outbound handle.
pub struct ConnectionHandler {
    /// The session being driven
    session: Session,

    /// Handle to the chat registry
    registry: RegistryHandle,

    /// Cancelled by the registry when this session stops accepting writes
    evict: CancellationToken,

    /// Whether `try_register` succeeded, so teardown knows to free the name
    reserved: bool,
}

impl ConnectionHandler {
    /// Creates a new connection handler.
    pub fn new(session: Session, registry: RegistryHandle) -> Self {
        Self {
            session,
            registry,
            evict: CancellationToken::new(),
            reserved: false,
        }
    }

    /// Runs the connection handler.
    ///
    /// Registers the client, relays its messages, then tears the session
    /// down. Returns when the connection is fully closed.
    pub async fn run(mut self) -> DisconnectReason {
        debug!(
            session_id = %self.session.id(),
            peer = ?self.session.peer(),
            "New client connected"
        );

        let reason = match self.register().await {
            Ok(()) => self.relay_messages().await,
            Err(reason) => reason,
        };

        self.teardown(&reason).await;
        reason
    }

    /// Reads the requested name and registers it.
    ///
    /// On success the session is in the broadcast set, `Active`, and its
    /// arrival has been announced to everyone else.
    async fn register(&mut self) -> Result<(), DisconnectReason> {
        self.advance(SessionState::Registering);

        let raw = match self.session.read_line().await {
            ReadOutcome::Line(line) => line,
            ReadOutcome::Closed => return Err(DisconnectReason::PeerClosed),
            ReadOutcome::Failed(e) => return Err(DisconnectReason::Io(e)),
        };

        let name = requested_name(&raw).map_err(|_| DisconnectReason::NoName)?;

        match self
            .registry
            .try_register(self.session.id(), name.clone())
            .await
        {
            Ok(()) => self.reserved = true,
            Err(RegistryError::NameTaken(taken)) => {
                let line = ServerMessage::name_taken(taken).to_string();
                if let Err(e) = self.session.send(&line).await {
                    debug!(
                        session_id = %self.session.id(),
                        error = %e,
                        "Failed to send name rejection"
                    );
                }
                return Err(DisconnectReason::Rejected);
            }
            Err(e) => {
                warn!(session_id = %self.session.id(), error = %e, "Registration failed");
                return Err(DisconnectReason::RegistryUnavailable);
            }
        }

        let entry = RegisteredSession {
            id: self.session.id(),
            name: name.clone(),
            outbound: self.session.outbound(),
            evict: self.evict.clone(),
        };
        if let Err(e) = self.registry.add(entry).await {
            warn!(session_id = %self.session.id(), error = %e, "Failed to add session");
            return Err(DisconnectReason::RegistryUnavailable);
        }

        self.session.set_display_name(name.clone());
        self.advance(SessionState::Active);

        info!(
            session_id = %self.session.id(),
            name = %name,
            "Client joined"
        );

        if self.registry.announce_join(self.session.id()).await.is_err() {
            return Err(DisconnectReason::RegistryUnavailable);
        }
        Ok(())
    }

    /// Reads lines until the client quits, the stream ends, or the registry
    /// evicts this session.
    async fn relay_messages(&mut self) -> DisconnectReason {
        let Some(name) = self.session.display_name().cloned() else {
            return DisconnectReason::NoName;
        };

        loop {
            let outcome = tokio::select! {
                biased;

                _ = self.evict.cancelled() => return DisconnectReason::Unreachable,

                outcome = self.session.read_line() => outcome,
            };

            let raw = match outcome {
                ReadOutcome::Line(line) => line,
                ReadOutcome::Closed => return DisconnectReason::PeerClosed,
                ReadOutcome::Failed(e) => return DisconnectReason::Io(e),
            };

            match ClientLine::parse(&raw) {
                ClientLine::Blank => continue,
                ClientLine::Quit => return DisconnectReason::Quit,
                ClientLine::Text(text) => {
                    if let Err(reason) = self.relay(&name, text).await {
                        return reason;
                    }
                }
            }
        }
    }

    async fn relay(&self, name: &DisplayName, text: String) -> Result<(), DisconnectReason> {
        let delivered = self
            .registry
            .broadcast(self.session.id(), name.clone(), text)
            .await
            .map_err(|_| DisconnectReason::RegistryUnavailable)?;

        debug!(
            session_id = %self.session.id(),
            delivered = delivered,
            "Relayed message"
        );
        Ok(())
    }

    /// Releases the transport, then forgets the session in the registry.
    ///
    /// Runs at most once: a session already `Closed` is left alone. No
    /// failure here stops the remaining steps.
    async fn teardown(&mut self, reason: &DisconnectReason) {
        if self.session.state() == SessionState::Closed {
            return;
        }

        let was_active = self.session.state() == SessionState::Active;
        self.advance(SessionState::Disconnecting);

        if let Err(e) = self.session.close().await {
            warn!(
                session_id = %self.session.id(),
                error = %e,
                "Failed to release connection"
            );
        }

        if self.reserved {
            match self.registry.remove(self.session.id()).await {
                Ok(_) => self.reserved = false,
                Err(e) => warn!(
                    session_id = %self.session.id(),
                    error = %e,
                    "Failed to remove session from registry"
                ),
            }
        }

        if was_active {
            if let Some(name) = self.session.display_name().cloned() {
                if let Err(e) = self.registry.announce_leave(self.session.id(), name).await {
                    debug!(
                        session_id = %self.session.id(),
                        error = %e,
                        "Failed to announce departure"
                    );
                }
            }
        }

        self.advance(SessionState::Closed);

        if reason.is_clean() {
            info!(
                session_id = %self.session.id(),
                name = ?self.session.display_name().map(DisplayName::as_str),
                reason = %reason,
                "Client disconnected"
            );
        } else {
            info!(
                session_id = %self.session.id(),
                name = ?self.session.display_name().map(DisplayName::as_str),
                reason = %reason,
                "Client dropped"
            );
        }
    }

    /// Moves the lifecycle forward. The handler only requests legal
    /// transitions, so a refusal is logged rather than propagated.
    fn advance(&mut self, next: SessionState) {
        if let Err(e) = self.session.advance(next) {
            warn!(session_id = %self.session.id(), error = %e, "Lifecycle transition refused");
        }
    }
}
