//! Speech output through `OpenAI` TTS and the default speakers

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::codec::{decode_mp3, playback_ratio, resample};
use super::playback::{AudioPlayback, PLAYBACK_SAMPLE_RATE};
use super::tts::{TextToSpeech, synthesis_speed};
use super::SpeechOutput;
use crate::store::VoicePreferences;
use crate::{Error, Result};

/// Synthesizes and plays text; a new utterance cuts off the previous one
pub struct SynthesizedSpeech {
    tts: Arc<TextToSpeech>,
    current: Mutex<Arc<AtomicBool>>,
    runtime: tokio::runtime::Handle,
}

impl SynthesizedSpeech {
    /// Create speech output bound to the current tokio runtime
    ///
    /// # Errors
    ///
    /// Returns error if called outside a tokio runtime
    pub fn new(tts: TextToSpeech) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Tts(format!("no async runtime for speech: {e}")))?;
        Ok(Self {
            tts: Arc::new(tts),
            current: Mutex::new(Arc::new(AtomicBool::new(false))),
            runtime,
        })
    }

    /// Cancel whatever is playing and return a fresh cancel flag
    fn interrupt(&self) -> Arc<AtomicBool> {
        let fresh = Arc::new(AtomicBool::new(false));
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current.store(true, Ordering::SeqCst);
        *current = Arc::clone(&fresh);
        fresh
    }
}

impl SpeechOutput for SynthesizedSpeech {
    fn speak(&self, text: &str, preferences: VoicePreferences) {
        let cancel = self.interrupt();
        let tts = Arc::clone(&self.tts);
        let text = text.to_string();

        self.runtime.spawn(async move {
            if let Err(e) = say(&tts, &text, preferences, cancel).await {
                tracing::warn!(error = %e, "speech output failed");
            }
        });
    }

    fn stop(&self) {
        self.interrupt();
    }
}

async fn say(
    tts: &TextToSpeech,
    text: &str,
    preferences: VoicePreferences,
    cancel: Arc<AtomicBool>,
) -> Result<()> {
    let mp3 = tts
        .synthesize(text, synthesis_speed(preferences.rate))
        .await?;
    if cancel.load(Ordering::SeqCst) {
        return Ok(());
    }

    // Output devices are not Send, so the whole device side runs on one thread
    tokio::task::spawn_blocking(move || {
        let (samples, source_rate) = decode_mp3(&mp3)?;
        let ratio = playback_ratio(source_rate, PLAYBACK_SAMPLE_RATE, preferences.pitch);
        let samples = resample(&samples, ratio)?;
        AudioPlayback::new()?.play_blocking(samples, &cancel)
    })
    .await
    .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
}
