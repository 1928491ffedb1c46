//! Lines sent from the relay to clients.

use std::fmt;

use palabre_core::DisplayName;

/// Prefix shown to the author of a message instead of their own name.
pub const SELF_PREFIX: &str = "Vous";

/// A line the relay sends to a client.
///
/// `Display` renders the exact wire text, without the trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Registration refused because another live session holds the name.
    NameTaken { name: DisplayName },

    /// Someone else joined.
    Joined { name: DisplayName },

    /// Someone else left.
    Left { name: DisplayName },

    /// Echo of the recipient's own message.
    OwnMessage { text: String },

    /// A message written by another participant.
    Relayed { from: DisplayName, text: String },
}

impl ServerMessage {
    /// Creates a rejection for a name already in use.
    pub fn name_taken(name: DisplayName) -> Self {
        Self::NameTaken { name }
    }

    /// Creates a join notice.
    pub fn joined(name: DisplayName) -> Self {
        Self::Joined { name }
    }

    /// Creates a leave notice.
    pub fn left(name: DisplayName) -> Self {
        Self::Left { name }
    }

    /// Renders a chat line for one recipient.
    ///
    /// The author gets the `Vous` prefix, everyone else gets the author's
    /// display name.
    pub fn chat(from: &DisplayName, text: &str, recipient_is_author: bool) -> Self {
        if recipient_is_author {
            Self::OwnMessage {
                text: text.to_string(),
            }
        } else {
            Self::Relayed {
                from: from.clone(),
                text: text.to_string(),
            }
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NameTaken { name } => write!(f, "Le pseudo {name} est déjà utilisé !"),
            Self::Joined { name } => write!(f, "{name} s'est connecté."),
            Self::Left { name } => write!(f, "{name} s'est déconnecté."),
            Self::OwnMessage { text } => write!(f, "{SELF_PREFIX} : {text}"),
            Self::Relayed { from, text } => write!(f, "{from} : {text}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(raw: &str) -> DisplayName {
        DisplayName::parse(raw).unwrap()
    }

    #[test]
    fn test_name_taken_text() {
        let msg = ServerMessage::name_taken(name("alice"));
        assert_eq!(msg.to_string(), "Le pseudo alice est déjà utilisé !");
    }

    #[test]
    fn test_join_and_leave_text() {
        assert_eq!(
            ServerMessage::joined(name("bob")).to_string(),
            "bob s'est connecté."
        );
        assert_eq!(
            ServerMessage::left(name("bob")).to_string(),
            "bob s'est déconnecté."
        );
    }

    #[test]
    fn test_chat_prefix_depends_on_recipient() {
        let alice = name("alice");
        assert_eq!(
            ServerMessage::chat(&alice, "hi", true).to_string(),
            "Vous : hi"
        );
        assert_eq!(
            ServerMessage::chat(&alice, "hi", false).to_string(),
            "alice : hi"
        );
    }

    #[test]
    fn test_chat_text_is_verbatim() {
        let text = "  déjà vu : 100% <ok> \"quoted\"  ";
        let rendered = ServerMessage::chat(&name("zoé"), text, false).to_string();
        assert_eq!(rendered.strip_prefix("zoé : "), Some(text));
    }
}
