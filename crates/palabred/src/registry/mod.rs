//! Chat registry using Actor pattern.
//!
//! The registry is the single owner of the state shared between connections:
//! the set of active sessions and the display names they claim. It receives
//! commands via a tokio mpsc channel and performs broadcast fan-out itself,
//! so every recipient sees broadcasts in the order the actor processed them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ConnectionHandler │────▶│  RegistryActor  │────▶│ Session Outbound │
//! │  (per client)    │     │                 │     │   (per client)   │
//! └──────────────────┘     └────────┬────────┘     └──────────────────┘
//!         │                         │
//!         │   RegistryCommand       │   ChatEvent
//!         │   (mpsc channel)        │   (broadcast)
//!         ▼                         ▼
//!   TryRegister/Add/          Event logger,
//!   Broadcast/Remove          tests
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All operations in this module follow the panic-free policy:
//! - No `.unwrap()` or `.expect()` in production code
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::RegistryActor;
pub use commands::{ChatEvent, RegisteredSession, RegistryCommand, RegistryError};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 256;

/// Spawn the registry actor and return a handle for interaction.
///
/// The actor stops once every handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use palabred::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let handle = spawn_registry();
///
///     let sessions = handle.list_sessions().await;
///     assert!(sessions.is_empty());
/// }
/// ```
pub fn spawn_registry() -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone());
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
