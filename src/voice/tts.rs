//! Text-to-speech (TTS) processing

use crate::chat::CredentialSource;
use crate::{Error, Result};

/// Default API base URL for speech synthesis
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Map a stored speaking rate (0.5 = normal) to the API speed multiplier
#[must_use]
pub fn synthesis_speed(rate: f64) -> f64 {
    (rate * 2.0).clamp(0.25, 4.0)
}

/// Synthesizes speech from text with `OpenAI` TTS
pub struct TextToSpeech {
    client: reqwest::Client,
    endpoint: String,
    credential: CredentialSource,
    voice: String,
    model: String,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    #[must_use]
    pub fn new_openai(credential: CredentialSource, voice: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{DEFAULT_BASE_URL}/audio/speech"),
            credential,
            voice,
            model,
        }
    }

    /// Synthesize text to speech
    ///
    /// # Arguments
    ///
    /// * `text` - Text to synthesize
    /// * `speed` - Speed multiplier (0.25 to 4.0)
    ///
    /// # Returns
    ///
    /// Audio bytes (MP3 format)
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, text: &str, speed: f64) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        let api_key = (self.credential)()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| Error::Config("OpenAI API key required for TTS".to_string()))?;

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_rate_is_normal_speed() {
        assert!((synthesis_speed(0.5) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn speed_is_clamped() {
        assert!((synthesis_speed(0.05) - 0.25).abs() < f64::EPSILON);
        assert!((synthesis_speed(9.0) - 4.0).abs() < f64::EPSILON);
    }
}
