//! Talkback - voice-driven chat client
//!
//! Captures speech, transcribes it, sends the conversation to a chat
//! completion endpoint and speaks the reply. Conversations, token usage and
//! voice preferences are kept in a local SQLite key-value store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              Presentation (CLI REPL)                 │
//! └────────────────────────┬─────────────────────────────┘
//!                          │ intents / SessionEvent
//! ┌────────────────────────▼─────────────────────────────┐
//! │                 SessionController                    │
//! │   turns  │  pending input  │  recording  │  dispatch │
//! └──┬──────────────┬───────────────┬──────────────┬─────┘
//!    │              │               │              │
//! ┌──▼─────────┐ ┌──▼──────────┐ ┌──▼──────────┐ ┌─▼──────────┐
//! │Transcription│ │ Chat client │ │Speech output│ │ Local store│
//! │  (Whisper)  │ │  (OpenAI)   │ │   (TTS)     │ │  (SQLite)  │
//! └─────────────┘ └─────────────┘ └─────────────┘ └────────────┘
//! ```

pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod store;
pub mod voice;

pub use config::Config;
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use session::{Collaborators, SessionController, SessionEvent, SessionState};
pub use store::LocalStorage;
