//! Registry actor - owns the session set and the claimed names.
//!
//! The RegistryActor is the single owner of cross-connection state. It
//! receives commands via an mpsc channel and publishes events via broadcast.
//! Because one task processes every command in order, name reservation,
//! enumeration for broadcast, and removal can never interleave, and all
//! recipients observe broadcasts in the same order.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the project panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Channel send failures are logged but don't panic

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use palabre_core::{DisplayName, SessionId, SessionInfo};
use palabre_protocol::ServerMessage;

use super::commands::{ChatEvent, RegisteredSession, RegistryCommand, RegistryError};

/// A session in the broadcast set.
struct Entry {
    session: RegisteredSession,
    added_at: DateTime<Utc>,

    /// Set after a failed delivery. The entry keeps its name until the
    /// owning handler removes it, but receives nothing more.
    unreachable: bool,
}

// ============================================================================
// Registry Actor
// ============================================================================

/// The registry actor - owns all shared chat state.
///
/// # Ownership
///
/// The actor owns:
/// - `sessions`: sessions added to the broadcast set, ordered by id so
///   deliveries follow connection order
/// - `taken_names`: every reserved display name and the session holding it
///
/// A name may be reserved without its session being in `sessions` yet
/// (between `TryRegister` and `Add`), never the other way round.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Broadcast set, keyed by session id
    sessions: BTreeMap<SessionId, Entry>,

    /// Reserved names and their holder
    taken_names: HashMap<DisplayName, SessionId>,

    /// Event publisher for observers (logging, tests)
    event_publisher: broadcast::Sender<ChatEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<ChatEvent>,
    ) -> Self {
        Self {
            receiver,
            sessions: BTreeMap::new(),
            taken_names: HashMap::new(),
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    /// This is the main entry point - call this in a spawned task.
    pub async fn run(mut self) {
        info!("Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd).await;
        }

        info!(
            "Registry actor stopped (sessions: {})",
            self.sessions.len()
        );
    }

    /// Dispatches a command to the appropriate handler.
    async fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::TryRegister {
                session_id,
                name,
                respond_to,
            } => {
                let result = self.handle_try_register(session_id, name);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Add {
                session,
                respond_to,
            } => {
                let result = self.handle_add(*session);
                let _ = respond_to.send(result);
            }
            RegistryCommand::Remove {
                session_id,
                respond_to,
            } => {
                let removed = self.handle_remove(session_id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Broadcast {
                sender,
                sender_name,
                text,
                respond_to,
            } => {
                let delivered = self.handle_broadcast(sender, sender_name, text).await;
                let _ = respond_to.send(delivered);
            }
            RegistryCommand::AnnounceJoin {
                session_id,
                respond_to,
            } => {
                let delivered = self.handle_announce_join(session_id).await;
                let _ = respond_to.send(delivered);
            }
            RegistryCommand::AnnounceLeave {
                session_id,
                name,
                respond_to,
            } => {
                let delivered = self.handle_announce_leave(session_id, name).await;
                let _ = respond_to.send(delivered);
            }
            RegistryCommand::ListSessions { respond_to } => {
                let _ = respond_to.send(self.handle_list_sessions());
            }
            RegistryCommand::IsNameTaken { name, respond_to } => {
                let _ = respond_to.send(self.taken_names.contains_key(&name));
            }
        }
    }

    // ========================================================================
    // Command Handlers
    // ========================================================================

    /// Check-and-insert of a display name, in one step.
    ///
    /// Reserving the name a session already holds succeeds again.
    fn handle_try_register(
        &mut self,
        session_id: SessionId,
        name: DisplayName,
    ) -> Result<(), RegistryError> {
        if let Some(holder) = self.taken_names.get(&name) {
            if *holder == session_id {
                return Ok(());
            }

            info!(
                session_id = %session_id,
                holder = %holder,
                name = %name,
                "Display name already taken"
            );
            let _ = self.event_publisher.send(ChatEvent::Rejected {
                session_id,
                name: name.clone(),
            });
            return Err(RegistryError::NameTaken(name));
        }

        debug!(session_id = %session_id, name = %name, "Display name reserved");
        self.taken_names.insert(name, session_id);
        Ok(())
    }

    /// Adds a session whose name this same session reserved.
    fn handle_add(&mut self, session: RegisteredSession) -> Result<(), RegistryError> {
        if self.taken_names.get(&session.name) != Some(&session.id) {
            warn!(
                session_id = %session.id,
                name = %session.name,
                "Add without a matching name reservation"
            );
            return Err(RegistryError::NameNotReserved(session.id));
        }

        let session_id = session.id;
        let name = session.name.clone();
        self.sessions.insert(
            session_id,
            Entry {
                session,
                added_at: Utc::now(),
                unreachable: false,
            },
        );

        info!(
            session_id = %session_id,
            name = %name,
            total_sessions = self.sessions.len(),
            "Session registered"
        );
        Ok(())
    }

    /// Forgets a session and frees every name it holds.
    ///
    /// Returns `false` when there was nothing to forget.
    fn handle_remove(&mut self, session_id: SessionId) -> bool {
        let removed = self.sessions.remove(&session_id).is_some();

        let names_before = self.taken_names.len();
        self.taken_names.retain(|_, holder| *holder != session_id);
        let freed = names_before - self.taken_names.len();

        if removed || freed > 0 {
            info!(
                session_id = %session_id,
                freed_names = freed,
                remaining_sessions = self.sessions.len(),
                "Session removed"
            );
        } else {
            debug!(session_id = %session_id, "Remove of unknown session ignored");
        }

        removed || freed > 0
    }

    async fn handle_broadcast(
        &mut self,
        sender: SessionId,
        sender_name: DisplayName,
        text: String,
    ) -> usize {
        let delivered = self
            .deliver(None, |recipient| {
                ServerMessage::chat(&sender_name, &text, recipient == sender).to_string()
            })
            .await;

        debug!(
            session_id = %sender,
            name = %sender_name,
            delivered = delivered,
            "Message broadcast"
        );

        let _ = self.event_publisher.send(ChatEvent::Message {
            session_id: sender,
            name: sender_name,
            text,
            delivered,
        });

        delivered
    }

    async fn handle_announce_join(&mut self, session_id: SessionId) -> usize {
        let Some(name) = self
            .sessions
            .get(&session_id)
            .map(|entry| entry.session.name.clone())
        else {
            debug!(session_id = %session_id, "Join announcement for unknown session skipped");
            return 0;
        };

        let line = ServerMessage::joined(name.clone()).to_string();
        let delivered = self.deliver(Some(session_id), |_| line.clone()).await;

        let _ = self
            .event_publisher
            .send(ChatEvent::Joined { session_id, name });

        delivered
    }

    async fn handle_announce_leave(&mut self, session_id: SessionId, name: DisplayName) -> usize {
        let line = ServerMessage::left(name.clone()).to_string();
        let delivered = self.deliver(Some(session_id), |_| line.clone()).await;

        let _ = self
            .event_publisher
            .send(ChatEvent::Left { session_id, name });

        delivered
    }

    fn handle_list_sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .values()
            .map(|entry| SessionInfo {
                id: entry.session.id,
                name: entry.session.name.clone(),
                connected_at: entry.added_at,
            })
            .collect()
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Sends one rendered line to every reachable session except `skip`.
    ///
    /// A failed send never stops the loop: the recipient is marked
    /// unreachable and its evict token is cancelled so its handler tears it
    /// down. Returns the number of successful deliveries.
    async fn deliver<F>(&mut self, skip: Option<SessionId>, render: F) -> usize
    where
        F: Fn(SessionId) -> String,
    {
        let publisher = &self.event_publisher;
        let mut delivered = 0;

        for (id, entry) in self.sessions.iter_mut() {
            if Some(*id) == skip || entry.unreachable {
                continue;
            }

            match entry.session.outbound.send(&render(*id)).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(
                        session_id = %id,
                        error = %e,
                        "Recipient unreachable, scheduling removal"
                    );
                    entry.unreachable = true;
                    entry.session.evict.cancel();
                    let _ = publisher.send(ChatEvent::RecipientUnreachable {
                        session_id: *id,
                        error: e.to_string(),
                    });
                }
            }
        }

        delivered
    }

    // ========================================================================
    // Accessors (for testing)
    // ========================================================================

    /// Returns the number of sessions in the broadcast set.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
