//! Message and Conversation domain types.
//!
//! A conversation owns an ordered, append-only sequence of messages. The
//! "current" conversation is never global state: callers carry a [`Session`]
//! naming it into every turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A single message in a conversation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Tokens attributed to this message (0 when unknown)
    #[serde(default)]
    pub token_count: u32,

    /// When the message was written
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            token_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>, token_count: u32) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            token_count,
            created_at: Utc::now(),
        }
    }

    /// Whether the message carries any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// A conversation header as listed by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Default name for a conversation created without one.
pub fn default_conversation_name(now: DateTime<Utc>) -> String {
    format!("Chat {}", now.format("%Y-%m-%d %H:%M"))
}

/// Explicit per-caller session context.
///
/// Every orchestrator call receives the session it acts on; switching
/// conversations means building a new `Session`.
#[derive(Debug, Clone)]
pub struct Session {
    /// The conversation this session writes to
    pub conversation_id: ConversationId,

    /// How many recent messages are replayed to the backend
    pub history_limit: usize,
}

impl Session {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            history_limit: 20,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn create_user_message() {
        let msg = Message::user("j'ai testé le replay");
        assert_eq!(msg.role, Role::User);
        assert_eq!(msg.token_count, 0);
        assert!(!msg.is_blank());
    }

    #[test]
    fn blank_detection() {
        assert!(Message::assistant("   \n", 3).is_blank());
    }

    #[test]
    fn role_roundtrip_through_str() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn default_name_uses_minute_precision() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 59).unwrap();
        assert_eq!(default_conversation_name(now), "Chat 2025-03-09 14:05");
    }

    #[test]
    fn session_defaults() {
        let session = Session::new(ConversationId::from("c1")).with_history_limit(5);
        assert_eq!(session.conversation_id.as_str(), "c1");
        assert_eq!(session.history_limit, 5);
    }
}
