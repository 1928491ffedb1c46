//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to chat events. Every connection
//! handler receives its own clone; nothing else is shared between them.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel errors are mapped to `RegistryError::ChannelClosed`

use tokio::sync::{broadcast, mpsc, oneshot};

use palabre_core::{DisplayName, SessionId, SessionInfo};

use super::commands::{ChatEvent, RegisteredSession, RegistryCommand, RegistryError};

// ============================================================================
// Registry Handle
// ============================================================================

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
///
/// # Usage
///
/// ```ignore
/// let handle = registry_handle.clone();
///
/// handle.try_register(id, name.clone()).await?;
/// handle.add(registered).await?;
/// handle.announce_join(id).await?;
///
/// handle.broadcast(id, name, "hello".to_string()).await?;
/// ```
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<ChatEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    ///
    /// # Arguments
    ///
    /// * `sender` - The command channel sender for communicating with the actor
    /// * `event_sender` - The broadcast sender for subscribing to events
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Atomically reserve `name` for `session_id`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NameTaken` if another live session holds the name
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn try_register(
        &self,
        session_id: SessionId,
        name: DisplayName,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::TryRegister {
                session_id,
                name,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Add a session to the broadcast set after its name was reserved.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NameNotReserved` if `try_register` did not succeed first
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn add(&self, session: RegisteredSession) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Add {
                session: Box::new(session),
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Forget a session and free its name.
    ///
    /// Returns `Ok(false)` if the session was already gone.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn remove(&self, session_id: SessionId) -> Result<bool, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Remove {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Broadcast a chat line from `sender` to every session.
    ///
    /// Returns the number of recipients reached. Per-recipient failures are
    /// handled inside the registry and never surface here.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn broadcast(
        &self,
        sender: SessionId,
        sender_name: DisplayName,
        text: String,
    ) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Broadcast {
                sender,
                sender_name,
                text,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Announce to every other session that `session_id` joined.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn announce_join(&self, session_id: SessionId) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::AnnounceJoin {
                session_id,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// Announce to every other session that `session_id` left.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn announce_leave(
        &self,
        session_id: SessionId,
        name: DisplayName,
    ) -> Result<usize, RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::AnnounceLeave {
                session_id,
                name,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)
    }

    /// List the sessions in the broadcast set.
    ///
    /// Returns an empty vector if communication with the actor fails.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::ListSessions { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Number of sessions in the broadcast set.
    pub async fn session_count(&self) -> usize {
        self.list_sessions().await.len()
    }

    /// Check whether a display name is currently reserved.
    ///
    /// Returns `false` if communication with the actor fails.
    pub async fn is_name_taken(&self, name: DisplayName) -> bool {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::IsNameTaken {
                name,
                respond_to: tx,
            })
            .await
            .is_err()
        {
            return false;
        }

        rx.await.unwrap_or(false)
    }

    /// Subscribe to chat events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    ///
    /// Returns `true` if the command channel is still open.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}
