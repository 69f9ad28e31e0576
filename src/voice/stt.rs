//! Speech-to-text (STT) processing

use async_trait::async_trait;

use super::streaming::Transcribe;
use crate::chat::CredentialSource;
use crate::{Error, Result};

/// Response from `OpenAI` Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes WAV audio with `OpenAI` Whisper
pub struct SpeechToText {
    client: reqwest::Client,
    endpoint: String,
    credential: CredentialSource,
    model: String,
}

impl SpeechToText {
    /// Create a Whisper STT instance against `base_url`
    ///
    /// The credential is resolved per request so a key stored at runtime is
    /// picked up without a restart.
    #[must_use]
    pub fn with_base_url(base_url: &str, credential: CredentialSource, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            credential,
            model,
        }
    }

    /// Whether a credential is currently available
    #[must_use]
    pub fn has_credential(&self) -> bool {
        (self.credential)().is_some_and(|k| !k.is_empty())
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> Result<String> {
        let api_key = (self.credential)()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for Whisper".to_string()))?;

        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                e
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Stt(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            e
        })?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}

#[async_trait]
impl Transcribe for SpeechToText {
    async fn transcribe_wav(&self, wav: Vec<u8>) -> Result<String> {
        self.transcribe(&wav).await
    }
}
