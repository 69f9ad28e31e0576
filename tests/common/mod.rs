//! Shared test utilities

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use talkback::chat::{ChatCompletion, ChatCompletionClient, ChatMessage, CompletionError, Usage};
use talkback::session::Role;
use talkback::store::{KeyValueStore, SqliteStore, VoicePreferences};
use talkback::voice::{
    Availability, Recording, SpeechOutput, TranscriptEvent, TranscriptSender,
    TranscriptionSource, VoiceStatus,
};
use talkback::{Collaborators, LocalStorage, SessionController, db};

/// Key-value store over in-memory SQLite that records every write
pub struct CountingStore {
    inner: SqliteStore,
    writes: Mutex<Vec<String>>,
}

impl CountingStore {
    /// Number of writes made to `key`
    pub fn writes_to(&self, key: &str) -> usize {
        self.writes.lock().unwrap().iter().filter(|k| *k == key).count()
    }
}

impl KeyValueStore for CountingStore {
    fn get(&self, key: &str) -> talkback::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> talkback::Result<()> {
        self.writes.lock().unwrap().push(key.to_string());
        self.inner.set(key, value)
    }
}

/// Set up storage over an in-memory test database
#[must_use]
pub fn setup_storage() -> (LocalStorage, Arc<CountingStore>) {
    let pool = db::init_memory().expect("failed to init test db");
    let kv = Arc::new(CountingStore {
        inner: SqliteStore::new(pool),
        writes: Mutex::new(Vec::new()),
    });
    (LocalStorage::new(kv.clone()), kv)
}

/// Build a successful completion
pub fn completion(id: &str, content: &str, total_tokens: u64) -> ChatCompletion {
    ChatCompletion {
        id: id.to_string(),
        created: Some(1_700_000_000),
        message: ChatMessage::new(Role::Assistant, content),
        usage: Usage {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens,
        },
    }
}

/// Completion client that replays scripted results in order
#[derive(Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<ChatCompletion, CompletionError>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
    gate: Option<Arc<Semaphore>>,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<ChatCompletion, CompletionError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Each request waits for one permit on the returned semaphore
    pub fn gated(responses: Vec<Result<ChatCompletion, CompletionError>>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let client = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::new(responses)
        };
        (client, gate)
    }

    /// Message lists received so far
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatCompletionClient for ScriptedClient {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<ChatCompletion, CompletionError> {
        self.requests.lock().unwrap().push(messages);

        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate closed").forget();
        }

        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Transport("no scripted response".to_string())))
    }
}

/// Transcription source driven by the test through [`ScriptedTranscription::emit`]
pub struct ScriptedTranscription {
    status: VoiceStatus,
    sender: Mutex<Option<TranscriptSender>>,
    finish_requests: Arc<AtomicUsize>,
}

impl ScriptedTranscription {
    pub fn new(status: VoiceStatus) -> Self {
        Self {
            status,
            sender: Mutex::new(None),
            finish_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Deliver an event to the current recording
    pub fn emit(&self, event: TranscriptEvent) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            sender.send(event).expect("recording listener gone");
        }
    }

    /// Close the current recording's channel without a terminal event
    pub fn close(&self) {
        self.sender.lock().unwrap().take();
    }

    /// How many times a recording was asked to finish
    pub fn finish_requests(&self) -> usize {
        self.finish_requests.load(Ordering::SeqCst)
    }
}

struct ScriptedRecording {
    finish_requests: Arc<AtomicUsize>,
}

impl Recording for ScriptedRecording {
    fn finish(&mut self) {
        self.finish_requests.fetch_add(1, Ordering::SeqCst);
    }
}

impl TranscriptionSource for ScriptedTranscription {
    fn status(&self) -> VoiceStatus {
        self.status
    }

    fn start(&self, events: TranscriptSender) -> talkback::Result<Box<dyn Recording>> {
        *self.sender.lock().unwrap() = Some(events);
        Ok(Box::new(ScriptedRecording {
            finish_requests: Arc::clone(&self.finish_requests),
        }))
    }
}

/// Speech output that remembers what it was asked to say
#[derive(Default)]
pub struct RecordedSpeech {
    spoken: Mutex<Vec<(String, VoicePreferences)>>,
    stops: AtomicUsize,
}

impl RecordedSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken
            .lock()
            .unwrap()
            .iter()
            .map(|(text, _)| text.clone())
            .collect()
    }

    pub fn last_preferences(&self) -> Option<VoicePreferences> {
        self.spoken.lock().unwrap().last().map(|(_, p)| *p)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl SpeechOutput for RecordedSpeech {
    fn speak(&self, text: &str, preferences: VoicePreferences) {
        self.spoken
            .lock()
            .unwrap()
            .push((text.to_string(), preferences));
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Voice status with both capabilities granted
pub fn authorized() -> VoiceStatus {
    VoiceStatus {
        recognition: Availability::Authorized,
        audio: Availability::Authorized,
    }
}

/// A controller wired to stubs, with handles to inspect them
pub struct Harness {
    pub controller: SessionController,
    pub client: Arc<ScriptedClient>,
    pub transcription: Arc<ScriptedTranscription>,
    pub speech: Arc<RecordedSpeech>,
    pub storage: LocalStorage,
    pub kv: Arc<CountingStore>,
}

impl Harness {
    pub fn new(client: ScriptedClient) -> Self {
        Self::with_status(client, authorized())
    }

    pub fn with_status(client: ScriptedClient, status: VoiceStatus) -> Self {
        let (storage, kv) = setup_storage();
        let client = Arc::new(client);
        let transcription = Arc::new(ScriptedTranscription::new(status));
        let speech = Arc::new(RecordedSpeech::default());

        let controller = SessionController::new(Collaborators {
            client: client.clone(),
            transcription: transcription.clone(),
            speech: speech.clone(),
            storage: storage.clone(),
        });

        Self {
            controller,
            client,
            transcription,
            speech,
            storage,
            kv,
        }
    }
}
