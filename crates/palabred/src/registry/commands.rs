//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `ChatEvent`: Events published by the registry for observers
//!
//! All types are designed for async message passing and follow the panic-free policy.

use palabre_core::{DisplayName, SessionId, SessionInfo};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::session::Outbound;

// ============================================================================
// Registration Entry
// ============================================================================

/// What the registry keeps for a session added to the broadcast set.
///
/// The registry holds the outbound handle only to deliver lines. It never
/// closes it: closing belongs to the owning connection handler.
#[derive(Debug, Clone)]
pub struct RegisteredSession {
    /// Identity of the session
    pub id: SessionId,
    /// Name reserved through `TryRegister`
    pub name: DisplayName,
    /// Shared write side of the connection
    pub outbound: Outbound,
    /// Cancelled by the registry when a delivery to this session fails,
    /// so the owning handler tears the session down
    pub evict: CancellationToken,
}

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command that expects an answer carries a oneshot channel, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Atomically reserve a display name for a session.
    ///
    /// # Errors
    /// - `RegistryError::NameTaken` if another live session holds the name
    TryRegister {
        session_id: SessionId,
        name: DisplayName,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Add a session whose name is already reserved to the broadcast set.
    ///
    /// # Errors
    /// - `RegistryError::NameNotReserved` if `TryRegister` did not succeed
    ///   for this session and name
    Add {
        session: Box<RegisteredSession>,
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Forget a session and free its name.
    ///
    /// Answers `true` if anything was removed; removing an unknown session
    /// is a no-op.
    Remove {
        session_id: SessionId,
        respond_to: oneshot::Sender<bool>,
    },

    /// Deliver a chat line to every session in the broadcast set.
    ///
    /// Answers with the number of successful deliveries.
    Broadcast {
        sender: SessionId,
        sender_name: DisplayName,
        text: String,
        respond_to: oneshot::Sender<usize>,
    },

    /// Tell every other session that `session_id` joined.
    AnnounceJoin {
        session_id: SessionId,
        respond_to: oneshot::Sender<usize>,
    },

    /// Tell every other session that `session_id` left.
    ///
    /// The name travels with the command because the session is normally
    /// removed before its departure is announced.
    AnnounceLeave {
        session_id: SessionId,
        name: DisplayName,
        respond_to: oneshot::Sender<usize>,
    },

    /// List the sessions in the broadcast set.
    ListSessions {
        respond_to: oneshot::Sender<Vec<SessionInfo>>,
    },

    /// Check whether a name is currently reserved.
    IsNameTaken {
        name: DisplayName,
        respond_to: oneshot::Sender<bool>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Another live session already holds this display name.
    #[error("display name already taken: {0}")]
    NameTaken(DisplayName),

    /// `Add` was sent without a matching successful `TryRegister`.
    #[error("no name reserved for {0}")]
    NameNotReserved(SessionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

// ============================================================================
// Chat Events
// ============================================================================

/// Events published by the registry to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A session was added and its arrival announced.
    Joined { session_id: SessionId, name: DisplayName },

    /// A registration attempt hit a name already in use.
    Rejected { session_id: SessionId, name: DisplayName },

    /// A chat line was broadcast.
    Message {
        session_id: SessionId,
        name: DisplayName,
        text: String,
        delivered: usize,
    },

    /// A delivery failed; the recipient is scheduled for removal.
    RecipientUnreachable { session_id: SessionId, error: String },

    /// A session's departure was announced.
    Left { session_id: SessionId, name: DisplayName },
}
