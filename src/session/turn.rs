//! Conversation data model

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One utterance in a conversation
///
/// Fields are private so the role cannot change after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    id: String,
    role: Role,
    text: String,
}

impl Turn {
    /// Create a turn with an explicit id; `text` is trimmed
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role, text: &str) -> Self {
        Self {
            id: id.into(),
            role,
            text: text.trim().to_string(),
        }
    }

    /// Create a turn with a fresh random id
    #[must_use]
    pub fn generate(role: Role, text: &str) -> Self {
        Self::new(new_id(), role, text)
    }

    /// Create a user turn with a fresh random id
    #[must_use]
    pub fn user(text: &str) -> Self {
        Self::generate(Role::User, text)
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether this turn is shown as coming from the other side
    #[must_use]
    pub fn is_assistant(&self) -> bool {
        self.role != Role::User
    }
}

/// A persisted conversation snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Stable identifier for the conversation's lifetime
    pub conversation_id: String,
    /// Turns in conversational order, never including system turns
    pub turns: Vec<Turn>,
    /// Set at first persistence
    pub started_at: DateTime<Utc>,
    /// Set at every persistence
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Build a snapshot from in-memory turns, dropping system turns
    #[must_use]
    pub fn snapshot(
        conversation_id: &str,
        turns: &[Turn],
        started_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            turns: turns
                .iter()
                .filter(|t| t.role() != Role::System)
                .cloned()
                .collect(),
            started_at,
            updated_at,
        }
    }

    /// Why this snapshot cannot be loaded, if anything
    #[must_use]
    pub fn defect(&self) -> Option<&'static str> {
        if self.conversation_id.trim().is_empty() {
            return Some("empty conversation id");
        }

        let mut seen = HashSet::new();
        for turn in &self.turns {
            if !seen.insert(turn.id()) {
                return Some("duplicate turn id");
            }
            if turn.text().is_empty() {
                return Some("empty turn text");
            }
        }

        None
    }

    /// First user utterance, used as a listing title
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.turns
            .iter()
            .find(|t| t.role() == Role::User)
            .map(Turn::text)
    }
}

/// Fresh lowercase UUID string
#[must_use]
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
