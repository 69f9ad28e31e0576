//! Process-wide scalar settings: token usage, voice preferences, credential

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::{LocalStorage, keys};
use crate::Result;
use crate::chat::CredentialSource;

/// Price per thousand tokens used for the cost estimate (USD)
const PRICE_PER_1K_TOKENS: f64 = 0.02;

const DEFAULT_RATE: f64 = 0.5;
const DEFAULT_PITCH: f64 = 1.0;
const RATE_RANGE: (f64, f64) = (0.1, 1.0);
const PITCH_RANGE: (f64, f64) = (0.5, 2.0);

/// Cumulative token usage across all conversations
#[derive(Debug, Clone)]
pub struct UsageCounter {
    storage: LocalStorage,
}

impl UsageCounter {
    pub(super) const fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    /// Tokens consumed so far
    #[must_use]
    pub fn total(&self) -> u64 {
        self.storage.scalar(keys::TOTAL_TOKEN).unwrap_or(0)
    }

    /// Add `tokens` to the counter and return the new total
    ///
    /// # Errors
    ///
    /// Returns error if the current total cannot be read or the new total
    /// cannot be written. Nothing is written when the read fails.
    pub fn add(&self, tokens: u64) -> Result<u64> {
        let current: u64 = self.storage.try_scalar(keys::TOTAL_TOKEN)?.unwrap_or(0);
        let total = current.saturating_add(tokens);
        self.storage.set_scalar(keys::TOTAL_TOKEN, &total)?;
        Ok(total)
    }

    /// Reset the counter to zero
    ///
    /// # Errors
    ///
    /// Returns error if the counter cannot be written
    pub fn reset(&self) -> Result<()> {
        self.storage.set_scalar(keys::TOTAL_TOKEN, &0_u64)
    }

    /// Estimated spend in USD for the tokens consumed so far
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimated_cost(&self) -> f64 {
        self.total() as f64 / 1000.0 * PRICE_PER_1K_TOKENS
    }
}

/// Speech output tuning, read at playback time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoicePreferences {
    /// Speaking rate; 0.5 is normal speed
    pub rate: f64,
    /// Pitch multiplier; 1.0 is unchanged
    pub pitch: f64,
}

impl Default for VoicePreferences {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            pitch: DEFAULT_PITCH,
        }
    }
}

impl VoicePreferences {
    /// Load stored preferences; absent values read as defaults
    #[must_use]
    pub fn load(storage: &LocalStorage) -> Self {
        let defaults = Self::default();
        Self {
            rate: storage.scalar(keys::SPEAKER_RATE).unwrap_or(defaults.rate),
            pitch: storage.scalar(keys::SPEAKER_PITCH).unwrap_or(defaults.pitch),
        }
    }

    /// Persist these preferences
    ///
    /// # Errors
    ///
    /// Returns error if either value cannot be written
    pub fn save(&self, storage: &LocalStorage) -> Result<()> {
        storage.set_scalar(keys::SPEAKER_RATE, &self.rate)?;
        storage.set_scalar(keys::SPEAKER_PITCH, &self.pitch)
    }

    /// Restore and persist the defaults
    ///
    /// # Errors
    ///
    /// Returns error if the defaults cannot be written
    pub fn reset(storage: &LocalStorage) -> Result<Self> {
        let defaults = Self::default();
        defaults.save(storage)?;
        Ok(defaults)
    }

    /// Return a copy with the rate clamped into its allowed range
    #[must_use]
    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate.clamp(RATE_RANGE.0, RATE_RANGE.1);
        self
    }

    /// Return a copy with the pitch clamped into its allowed range
    #[must_use]
    pub fn with_pitch(mut self, pitch: f64) -> Self {
        self.pitch = pitch.clamp(PITCH_RANGE.0, PITCH_RANGE.1);
        self
    }
}

/// User-supplied API credential
#[derive(Debug, Clone)]
pub struct Credentials {
    storage: LocalStorage,
}

impl Credentials {
    pub(super) const fn new(storage: LocalStorage) -> Self {
        Self { storage }
    }

    /// Stored API key, if one is set and non-empty
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        self.storage
            .scalar::<String>(keys::API_KEY)
            .filter(|k| !k.is_empty())
    }

    /// Store a new API key; an empty string clears it
    ///
    /// # Errors
    ///
    /// Returns error if the key cannot be written
    pub fn set_api_key(&self, key: &str) -> Result<()> {
        self.storage.set_scalar(keys::API_KEY, &key.trim())
    }

    /// Accessor that reads the stored key on every call, falling back to
    /// `fallback` when none is stored
    #[must_use]
    pub fn into_source(self, fallback: Option<SecretString>) -> CredentialSource {
        Arc::new(move || {
            self.api_key()
                .or_else(|| fallback.as_ref().map(|k| k.expose_secret().to_string()))
        })
    }
}
