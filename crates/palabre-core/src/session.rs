//! Session identity, display names and lifecycle states.

use chrono::{DateTime, Utc};
use std::fmt;
use tracing::debug;

use crate::{DomainError, DomainResult};

// ============================================================================
// Type-Safe Identifiers
// ============================================================================

/// Process-unique identifier for one client connection.
///
/// Assigned by the listener from a monotonically increasing counter. It is
/// the only identity used for equality and removal: display names are
/// not unique over time and may be claimed again once freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a SessionId from a raw connection number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw connection number.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// A display name claimed by a session.
///
/// Always non-empty. Surrounding whitespace is stripped on parse so that
/// `"alice"` and `"alice "` cannot both be claimed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DisplayName(String);

impl DisplayName {
    /// Parses a requested display name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::EmptyDisplayName` if nothing but whitespace
    /// remains.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DomainError::EmptyDisplayName);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the underlying string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DisplayName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Lifecycle State
// ============================================================================

/// Lifecycle state of a session.
///
/// ```text
/// Connected ──▶ Registering ──▶ Active ──▶ Disconnecting ──▶ Closed
///     │              │                          ▲
///     └──────────────┴──────────────────────────┘
/// ```
///
/// `Closed` is terminal and is entered exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Accepted, nothing read yet.
    #[default]
    Connected,

    /// Waiting for the requested display name.
    Registering,

    /// Name claimed, relaying messages.
    Active,

    /// Quit, peer loss or name conflict; releasing resources.
    Disconnecting,

    /// Resources released and forgotten by the registry.
    Closed,
}

impl SessionState {
    /// Returns true if the state machine allows `self -> next`.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        matches!(
            (self, next),
            (Self::Connected, Self::Registering)
                | (Self::Connected, Self::Disconnecting)
                | (Self::Registering, Self::Active)
                | (Self::Registering, Self::Disconnecting)
                | (Self::Active, Self::Disconnecting)
                | (Self::Disconnecting, Self::Closed)
        )
    }

    /// Returns true until the session reaches `Closed`.
    #[must_use]
    pub fn is_live(&self) -> bool {
        !matches!(self, Self::Closed)
    }

    /// Returns the lowercase label used in logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Registering => "registering",
            Self::Active => "active",
            Self::Disconnecting => "disconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tracks the lifecycle of one session and enforces legal transitions.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    session_id: SessionId,
    state: SessionState,
}

impl Lifecycle {
    /// Starts a lifecycle in `Connected`.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            state: SessionState::Connected,
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidTransition` and leaves the state
    /// untouched if the transition is not allowed.
    pub fn advance(&mut self, next: SessionState) -> DomainResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                session_id: self.session_id,
                from: self.state,
                to: next,
            });
        }
        debug!(
            session_id = %self.session_id,
            from = %self.state,
            to = %next,
            "Session state transition"
        );
        self.state = next;
        Ok(())
    }
}

// ============================================================================
// Read Model
// ============================================================================

/// Read-only snapshot of a registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: DisplayName,
    pub connected_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_display() {
        assert_eq!(SessionId::new(42).to_string(), "session-42");
    }

    #[test]
    fn test_display_name_trims() {
        let name = DisplayName::parse("  alice \r").unwrap();
        assert_eq!(name.as_str(), "alice");
    }

    #[test]
    fn test_display_name_rejects_blank() {
        assert_eq!(DisplayName::parse(""), Err(DomainError::EmptyDisplayName));
        assert_eq!(DisplayName::parse("   "), Err(DomainError::EmptyDisplayName));
    }

    #[test]
    fn test_display_name_keeps_inner_spaces() {
        let name = DisplayName::parse("jean pierre").unwrap();
        assert_eq!(name.to_string(), "jean pierre");
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut lifecycle = Lifecycle::new(SessionId::new(1));
        assert_eq!(lifecycle.state(), SessionState::Connected);
        lifecycle.advance(SessionState::Registering).unwrap();
        lifecycle.advance(SessionState::Active).unwrap();
        lifecycle.advance(SessionState::Disconnecting).unwrap();
        lifecycle.advance(SessionState::Closed).unwrap();
        assert!(!lifecycle.state().is_live());
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut lifecycle = Lifecycle::new(SessionId::new(2));
        lifecycle.advance(SessionState::Disconnecting).unwrap();
        lifecycle.advance(SessionState::Closed).unwrap();

        for next in [
            SessionState::Connected,
            SessionState::Registering,
            SessionState::Active,
            SessionState::Disconnecting,
            SessionState::Closed,
        ] {
            let err = lifecycle.advance(next).unwrap_err();
            assert!(matches!(err, DomainError::InvalidTransition { .. }));
        }
        assert_eq!(lifecycle.state(), SessionState::Closed);
    }

    #[test]
    fn test_cannot_skip_registration() {
        assert!(!SessionState::Connected.can_transition_to(SessionState::Active));
        assert!(!SessionState::Active.can_transition_to(SessionState::Closed));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = DomainError::InvalidTransition {
            session_id: SessionId::new(7),
            from: SessionState::Closed,
            to: SessionState::Active,
        };
        assert_eq!(
            err.to_string(),
            "Invalid transition for session-7: closed -> active"
        );
    }
}
