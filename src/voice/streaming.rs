//! Transcription source that re-transcribes a growing audio buffer
//!
//! Capture runs on its own OS thread because audio streams are not `Send`.
//! While recording, the whole buffer is transcribed every
//! `partial_interval` and delivered as a partial result; when asked to
//! finish, the buffer is transcribed once more and delivered as final.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::codec::{SAMPLE_RATE, samples_to_wav};
use super::{Recording, TranscriptEvent, TranscriptSender, TranscriptionSource, VoiceStatus};
use crate::{Error, Result};

/// How often the capture thread checks for a stop request
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Minimum buffered audio before a partial transcription is attempted
const MIN_PARTIAL_SAMPLES: usize = SAMPLE_RATE as usize / 2;

/// Speech-to-text backend for whole WAV clips
#[async_trait]
pub trait Transcribe: Send + Sync {
    /// Transcribe a WAV clip to text
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe_wav(&self, wav: Vec<u8>) -> Result<String>;
}

/// A live audio input, owned by the capture thread
pub trait SampleSource {
    /// Sample rate of the buffered audio
    fn sample_rate(&self) -> u32;

    /// Everything captured so far, leaving the buffer intact
    fn snapshot(&self) -> Vec<f32>;

    /// Stop capturing and return everything captured
    fn finish(&mut self) -> Vec<f32>;
}

/// Opens an audio input; called on the capture thread
pub type InputFactory = Arc<dyn Fn() -> Result<Box<dyn SampleSource>> + Send + Sync>;

/// [`TranscriptionSource`] built from an audio input and an STT backend
pub struct StreamingTranscriber {
    stt: Arc<dyn Transcribe>,
    open_input: InputFactory,
    partial_interval: Duration,
    status: VoiceStatus,
}

impl StreamingTranscriber {
    /// Create a transcriber; a zero `partial_interval` disables partials
    #[must_use]
    pub fn new(
        stt: Arc<dyn Transcribe>,
        open_input: InputFactory,
        partial_interval: Duration,
        status: VoiceStatus,
    ) -> Self {
        Self {
            stt,
            open_input,
            partial_interval,
            status,
        }
    }
}

impl TranscriptionSource for StreamingTranscriber {
    fn status(&self) -> VoiceStatus {
        self.status
    }

    fn start(&self, events: TranscriptSender) -> Result<Box<dyn Recording>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Stt(format!("no async runtime for transcription: {e}")))?;

        let stop = Arc::new(AtomicBool::new(false));
        let worker = CaptureWorker {
            stt: Arc::clone(&self.stt),
            open_input: Arc::clone(&self.open_input),
            partial_interval: self.partial_interval,
            stop: Arc::clone(&stop),
            events,
            runtime,
        };

        std::thread::Builder::new()
            .name("talkback-capture".to_string())
            .spawn(move || worker.run())
            .map_err(|e| Error::Stt(format!("failed to spawn capture thread: {e}")))?;

        tracing::debug!("recording started");
        Ok(Box::new(StreamingRecording { stop }))
    }
}

struct StreamingRecording {
    stop: Arc<AtomicBool>,
}

impl Recording for StreamingRecording {
    fn finish(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for StreamingRecording {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

struct CaptureWorker {
    stt: Arc<dyn Transcribe>,
    open_input: InputFactory,
    partial_interval: Duration,
    stop: Arc<AtomicBool>,
    events: TranscriptSender,
    runtime: tokio::runtime::Handle,
}

impl CaptureWorker {
    fn run(self) {
        let event = match self.capture() {
            Ok(text) => TranscriptEvent::Final(text),
            Err(e) => {
                tracing::warn!(error = %e, "recording failed");
                TranscriptEvent::Error(e.to_string())
            }
        };

        if self.events.send(event).is_err() {
            tracing::debug!("transcript listener gone before final result");
        }
    }

    fn capture(&self) -> Result<String> {
        let mut input = (self.open_input)()?;
        let sample_rate = input.sample_rate();
        let mut last_partial = Instant::now();
        let mut transcribed_len = 0;

        while !self.stop.load(Ordering::SeqCst) {
            std::thread::sleep(POLL_INTERVAL);

            if self.partial_interval.is_zero() || last_partial.elapsed() < self.partial_interval {
                continue;
            }
            last_partial = Instant::now();

            let samples = input.snapshot();
            if samples.len() < MIN_PARTIAL_SAMPLES || samples.len() == transcribed_len {
                continue;
            }
            transcribed_len = samples.len();

            let text = self.transcribe(&samples, sample_rate)?;
            tracing::trace!(samples = samples.len(), "partial transcript");
            if self.events.send(TranscriptEvent::Partial(text)).is_err() {
                break;
            }
        }

        let samples = input.finish();
        if samples.is_empty() {
            return Ok(String::new());
        }
        self.transcribe(&samples, sample_rate)
    }

    fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let wav = samples_to_wav(samples, sample_rate)?;
        self.runtime
            .block_on(self.stt.transcribe_wav(wav))
            .map(|text| text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::mpsc;

    use super::*;
    use crate::voice::Availability;

    /// Buffer that grows by a quarter second on every look
    struct GrowingInput {
        buffer: Mutex<Vec<f32>>,
    }

    impl SampleSource for GrowingInput {
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        fn snapshot(&self) -> Vec<f32> {
            let mut buf = self.buffer.lock().unwrap();
            buf.extend(std::iter::repeat_n(0.1, SAMPLE_RATE as usize / 4));
            buf.clone()
        }

        fn finish(&mut self) -> Vec<f32> {
            std::mem::take(&mut *self.buffer.lock().unwrap())
        }
    }

    /// Reports how many samples the clip held
    struct CountingStt;

    #[async_trait]
    impl Transcribe for CountingStt {
        async fn transcribe_wav(&self, wav: Vec<u8>) -> Result<String> {
            let reader = hound::WavReader::new(std::io::Cursor::new(wav))
                .map_err(|e| Error::Stt(e.to_string()))?;
            Ok(format!(" {} samples ", reader.duration()))
        }
    }

    struct FailingStt;

    #[async_trait]
    impl Transcribe for FailingStt {
        async fn transcribe_wav(&self, _wav: Vec<u8>) -> Result<String> {
            Err(Error::Stt("backend down".to_string()))
        }
    }

    fn status() -> VoiceStatus {
        VoiceStatus {
            recognition: Availability::Authorized,
            audio: Availability::Authorized,
        }
    }

    fn growing_input() -> InputFactory {
        Arc::new(|| {
            Ok(Box::new(GrowingInput {
                buffer: Mutex::new(vec![0.1; SAMPLE_RATE as usize]),
            }) as Box<dyn SampleSource>)
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn partials_then_final() {
        let source = StreamingTranscriber::new(
            Arc::new(CountingStt),
            growing_input(),
            Duration::from_millis(30),
            status(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut recording = source.start(tx).unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(&first, TranscriptEvent::Partial(text) if text.ends_with("samples")));

        recording.finish();

        let mut last = first;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            last = event;
            if terminal {
                break;
            }
        }
        assert!(matches!(last, TranscriptEvent::Final(text) if text.ends_with("samples")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn zero_interval_only_delivers_final() {
        let source = StreamingTranscriber::new(
            Arc::new(CountingStt),
            growing_input(),
            Duration::ZERO,
            status(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut recording = source.start(tx).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        recording.finish();

        let event = rx.recv().await.unwrap();
        assert_eq!(event, TranscriptEvent::Final(format!("{} samples", SAMPLE_RATE)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn backend_failure_is_terminal_error() {
        let source = StreamingTranscriber::new(
            Arc::new(FailingStt),
            growing_input(),
            Duration::from_millis(10),
            status(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _recording = source.start(tx).unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TranscriptEvent::Error(msg) if msg.contains("backend down")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn input_open_failure_is_terminal_error() {
        let open: InputFactory = Arc::new(|| Err(Error::Audio("no input device".to_string())));
        let source =
            StreamingTranscriber::new(Arc::new(CountingStt), open, Duration::ZERO, status());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _recording = source.start(tx).unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, TranscriptEvent::Error(msg) if msg.contains("no input device")));
    }
}
