//! Local persistence over a flat key-value namespace
//!
//! Every persisted value lives under one key (see [`keys`]). Collections are
//! stored as a single JSON array and rewritten wholesale on every change;
//! scalars are stored as their textual form.

mod conversations;
pub mod keys;
mod settings;
mod sqlite;

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;

pub use conversations::ConversationLog;
pub use settings::{Credentials, UsageCounter, VoicePreferences};
pub use sqlite::SqliteStore;

/// Raw access to the key-value namespace
///
/// Implementations must be safe to share across tasks, but no atomicity is
/// expected beyond a single `get` or `set`.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` when absent
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// Typed view of a [`KeyValueStore`]
#[derive(Clone)]
pub struct LocalStorage {
    kv: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for LocalStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStorage").finish_non_exhaustive()
    }
}

impl LocalStorage {
    /// Wrap a key-value backend
    #[must_use]
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Load the sequence stored under `key`
    ///
    /// An absent key, an unreadable backend, or a blob that does not parse
    /// all yield an empty sequence.
    #[must_use]
    pub fn load_all<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        self.read_sequence(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "failed to read stored sequence");
            Vec::new()
        })
    }

    /// Read the sequence under `key`, keeping backend failures distinct
    ///
    /// Absent and corrupt values read as empty.
    fn read_sequence<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(Vec::new());
        };

        Ok(serde_json::from_str(&raw).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "stored sequence is corrupt, treating as empty");
            Vec::new()
        }))
    }

    /// Insert or replace `value` in the sequence stored under `key`
    ///
    /// Replaces the first element for which `matches(existing, &value)` holds,
    /// otherwise appends. The whole sequence is written back. Not safe against
    /// concurrent writers of the same key.
    ///
    /// Returns `false` without writing if the backend cannot be read, and
    /// `false` if the sequence could not be encoded or written.
    pub fn upsert<T, F>(&self, value: T, key: &str, matches: F) -> bool
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T, &T) -> bool,
    {
        let mut items: Vec<T> = match self.read_sequence(key) {
            Ok(items) => items,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to read sequence, not writing");
                return false;
            }
        };

        if let Some(slot) = items.iter_mut().find(|existing| matches(existing, &value)) {
            *slot = value;
        } else {
            items.push(value);
        }

        let encoded = match serde_json::to_string(&items) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(key, error = %e, "failed to encode sequence");
                return false;
            }
        };

        match self.kv.set(key, &encoded) {
            Ok(()) => {
                tracing::debug!(key, len = items.len(), "sequence written");
                true
            }
            Err(e) => {
                tracing::error!(key, error = %e, "failed to write sequence");
                false
            }
        }
    }

    /// Read a scalar stored under `key`, or `None` if absent, unparseable, or
    /// unreadable
    #[must_use]
    pub fn scalar<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.try_scalar(key).unwrap_or_else(|e| {
            tracing::warn!(key, error = %e, "failed to read scalar");
            None
        })
    }

    /// Read a scalar stored under `key`, or `None` if absent or unparseable
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be read
    pub fn try_scalar<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        Ok(self.kv.get(key)?.and_then(|s| s.trim().parse().ok()))
    }

    /// Write a scalar under `key`
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be written
    pub fn set_scalar<T: ToString>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, &value.to_string())
    }

    /// Cumulative token usage counter
    #[must_use]
    pub fn usage(&self) -> UsageCounter {
        UsageCounter::new(self.clone())
    }

    /// Stored API credential
    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.clone())
    }

    /// Persisted conversation snapshots
    #[must_use]
    pub fn conversations(&self) -> ConversationLog {
        ConversationLog::new(self.clone())
    }
}
