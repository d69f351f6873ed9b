//! Conversation types shared by the session store and the chat engine

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One user message and the assistant reply that answered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub user_message: String,
    pub assistant_message: String,
}

impl Turn {
    pub fn new(user_message: impl Into<String>, assistant_message: impl Into<String>) -> Self {
        Self {
            user_message: user_message.into(),
            assistant_message: assistant_message.into(),
        }
    }

    pub fn into_messages(self) -> [Message; 2] {
        [
            Message::user(self.user_message),
            Message::assistant(self.assistant_message),
        ]
    }
}

/// Identifies a single ongoing exchange, usually one user in one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationKey(String);

impl ConversationKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Build a key from the guild/channel/user triple. Direct messages have no
    /// guild and use `dm` in its place.
    pub fn scoped(guild_id: Option<&str>, channel_id: &str, user_id: &str) -> Self {
        Self(format!(
            "{}:{}:{}",
            guild_id.unwrap_or("dm"),
            channel_id,
            user_id
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConversationKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// The most recent reply that can still be regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyState {
    /// Id of the message that carries the reply (used to edit it in place)
    pub target_message_id: String,

    /// The user message the reply answered
    pub user_message: String,

    /// Quick-reply action that produced the user message, if any
    #[serde(default)]
    pub quick_reply_input: Option<String>,

    /// The assistant text currently shown to the user
    pub last_assistant_message: String,

    /// Whether the reply was only visible to the requesting user
    #[serde(default)]
    pub is_private: bool,

    pub updated_at: DateTime<Utc>,
}

impl ReplyState {
    /// A state is only regenerable while it still describes the head of history.
    pub fn matches(&self, turn: &Turn) -> bool {
        self.user_message == turn.user_message
            && self.last_assistant_message == turn.assistant_message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_key() {
        let key = ConversationKey::scoped(Some("g1"), "c1", "u1");
        assert_eq!(key.as_str(), "g1:c1:u1");

        let dm = ConversationKey::scoped(None, "c9", "u2");
        assert_eq!(dm.to_string(), "dm:c9:u2");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&Message::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_reply_state_matches_turn() {
        let state = ReplyState {
            target_message_id: "m1".into(),
            user_message: "hello".into(),
            quick_reply_input: None,
            last_assistant_message: "hi there".into(),
            is_private: false,
            updated_at: Utc::now(),
        };

        assert!(state.matches(&Turn::new("hello", "hi there")));
        assert!(!state.matches(&Turn::new("hello", "something else")));
        assert!(!state.matches(&Turn::new("bye", "hi there")));
    }
}
