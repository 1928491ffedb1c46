//! palabre core - shared domain types for the chat relay
//!
//! This crate provides the session identity, display name and lifecycle
//! types shared between the wire protocol and the daemon (`palabred`).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod session;

pub use error::{DomainError, DomainResult};
pub use session::{DisplayName, Lifecycle, SessionId, SessionInfo, SessionState};
