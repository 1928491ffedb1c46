//! Domain-specific error types following panic-free policy.

use crate::{SessionId, SessionState};
use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A display name was empty or only whitespace
    #[error("Display name is empty")]
    EmptyDisplayName,

    /// A lifecycle transition that the session state machine forbids
    #[error("Invalid transition for {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: SessionId,
        from: SessionState,
        to: SessionState,
    },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
