//! Persisted conversation snapshots

use super::{LocalStorage, keys};
use crate::session::Conversation;

/// Snapshot set stored under [`keys::LOCAL_MESSAGES`]
#[derive(Debug, Clone)]
pub struct ConversationLog {
    storage: LocalStorage,
}

impl ConversationLog {
    pub(super) const fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    /// All snapshots in stored order
    #[must_use]
    pub fn list(&self) -> Vec<Conversation> {
        self.storage.load_all(keys::LOCAL_MESSAGES)
    }

    /// Snapshot with the given conversation id
    #[must_use]
    pub fn find(&self, conversation_id: &str) -> Option<Conversation> {
        self.list()
            .into_iter()
            .find(|c| c.conversation_id == conversation_id)
    }

    /// Insert or replace the snapshot with the same conversation id
    ///
    /// Returns `false` if the write failed.
    pub fn save(&self, conversation: Conversation) -> bool {
        self.storage
            .upsert(conversation, keys::LOCAL_MESSAGES, |existing, new| {
                existing.conversation_id == new.conversation_id
            })
    }
}
