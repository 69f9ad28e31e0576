//! Voice collaborators
//!
//! The session controller only sees two seams: a [`TranscriptionSource`] that
//! streams transcript events into a channel, and a [`SpeechOutput`] that plays
//! text aloud. Everything else here is one concrete way to provide them:
//! Whisper transcription of microphone audio and `OpenAI` speech synthesis.
//! Device I/O (microphone, speakers) needs the `audio` feature.

#[cfg(feature = "audio")]
mod capture;
mod codec;
#[cfg(feature = "audio")]
mod playback;
#[cfg(feature = "audio")]
mod speaker;
mod streaming;
mod stt;
mod tts;

use tokio::sync::mpsc;

use crate::store::VoicePreferences;
use crate::{Error, Result};

#[cfg(feature = "audio")]
pub use capture::{AudioCapture, microphone_input};
pub use codec::{SAMPLE_RATE, decode_mp3, playback_ratio, resample, samples_to_wav};
#[cfg(feature = "audio")]
pub use playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE};
#[cfg(feature = "audio")]
pub use speaker::SynthesizedSpeech;
pub use streaming::{InputFactory, SampleSource, StreamingTranscriber, Transcribe};
pub use stt::SpeechToText;
pub use tts::{TextToSpeech, synthesis_speed};

/// One delivery from a transcription source
///
/// Zero or more `Partial`s are followed by exactly one `Final` or `Error`.
/// Each `Partial` carries the full current best transcription, not a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Partial(String),
    Final(String),
    Error(String),
}

impl TranscriptEvent {
    /// Whether this event ends the recording
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_) | Self::Error(_))
    }
}

/// Sender half handed to a transcription source
pub type TranscriptSender = mpsc::UnboundedSender<TranscriptEvent>;

/// Whether a capability may be used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    NotDetermined,
    Denied,
    Restricted,
    Authorized,
}

impl std::fmt::Display for Availability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NotDetermined => "not determined",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::Authorized => "authorized",
        })
    }
}

/// Availability of speech recognition and audio input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceStatus {
    pub recognition: Availability,
    pub audio: Availability,
}

impl VoiceStatus {
    /// Whether recording can be started at all
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.recognition == Availability::Authorized && self.audio == Availability::Authorized
    }

    /// Text of the synthetic system turn opening every conversation
    #[must_use]
    pub fn summary(&self) -> String {
        format!("Recognition {}\nAudio {}", self.recognition, self.audio)
    }
}

/// Handle to a running recording
pub trait Recording: Send {
    /// Ask the source to stop; it acknowledges with a terminal event on its
    /// own schedule
    fn finish(&mut self);
}

/// Produces transcripts from live audio
pub trait TranscriptionSource: Send + Sync {
    /// Current availability of recognition and audio input
    fn status(&self) -> VoiceStatus;

    /// Begin a recording that delivers events into `events`
    ///
    /// # Errors
    ///
    /// Returns error if the recording cannot be started
    fn start(&self, events: TranscriptSender) -> Result<Box<dyn Recording>>;
}

/// Plays text aloud; fire-and-forget
pub trait SpeechOutput: Send + Sync {
    /// Speak `text`, interrupting anything already playing
    fn speak(&self, text: &str, preferences: VoicePreferences);

    /// Stop playback immediately
    fn stop(&self);
}

/// Transcription source used when voice input is disabled
#[derive(Debug, Clone, Copy)]
pub struct NoTranscription {
    status: VoiceStatus,
}

impl NoTranscription {
    #[must_use]
    pub const fn new(status: VoiceStatus) -> Self {
        Self { status }
    }
}

impl Default for NoTranscription {
    fn default() -> Self {
        Self::new(VoiceStatus {
            recognition: Availability::Denied,
            audio: Availability::Denied,
        })
    }
}

impl TranscriptionSource for NoTranscription {
    fn status(&self) -> VoiceStatus {
        self.status
    }

    fn start(&self, _events: TranscriptSender) -> Result<Box<dyn Recording>> {
        Err(Error::Stt("voice input is disabled".to_string()))
    }
}

/// Speech output that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct MutedSpeech;

impl SpeechOutput for MutedSpeech {
    fn speak(&self, text: &str, preferences: VoicePreferences) {
        tracing::debug!(
            chars = text.len(),
            rate = preferences.rate,
            pitch = preferences.pitch,
            "speech output muted"
        );
    }

    fn stop(&self) {}
}
