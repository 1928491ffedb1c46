//! Classification of lines received from clients.

use palabre_core::{DisplayName, DomainResult};

/// Command that ends a session cleanly.
pub const QUIT_COMMAND: &str = "/quit";

/// Removes one trailing `\n` or `\r\n`, nothing else.
pub fn strip_line_terminator(raw: &str) -> &str {
    let line = raw.strip_suffix('\n').unwrap_or(raw);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Parses the first line of a connection as a requested display name.
///
/// # Errors
///
/// Returns `DomainError::EmptyDisplayName` for an empty or whitespace-only
/// line.
pub fn requested_name(raw: &str) -> DomainResult<DisplayName> {
    DisplayName::parse(strip_line_terminator(raw))
}

/// A line received from an active client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine {
    /// Nothing but the terminator; ignored.
    Blank,

    /// The literal `/quit` command.
    Quit,

    /// Anything else, to be broadcast exactly as received.
    Text(String),
}

impl ClientLine {
    /// Classifies a raw line, with or without its terminator.
    pub fn parse(raw: &str) -> Self {
        let line = strip_line_terminator(raw);
        if line.is_empty() {
            Self::Blank
        } else if line == QUIT_COMMAND {
            Self::Quit
        } else {
            Self::Text(line.to_string())
        }
    }
}
