//! Session controller

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use super::state::{DispatchState, RecordingState, SessionState};
use super::turn::{Conversation, Role, Turn, new_id};
use crate::chat::{ChatCompletion, ChatCompletionClient, ChatMessage, CompletionError};
use crate::store::{LocalStorage, VoicePreferences};
use crate::voice::{Recording, SpeechOutput, TranscriptEvent, TranscriptionSource};
use crate::{Error, Result};

/// External services the controller drives
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn ChatCompletionClient>,
    pub transcription: Arc<dyn TranscriptionSource>,
    pub speech: Arc<dyn SpeechOutput>,
    pub storage: LocalStorage,
}

/// What changed when a continuation was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Pending input was replaced by a transcript
    TranscriptUpdated { text: String, is_final: bool },
    /// Recording ended without a final transcript
    RecordingStopped { error: Option<String> },
    /// An assistant turn was appended, spoken and persisted
    ReplyReceived(Turn),
    /// The request failed; the user turn stays so it can be sent again
    DispatchFailed(CompletionError),
    /// A reply arrived for a conversation that is no longer active
    StaleReplyDiscarded { conversation_id: String },
}

/// Work finished in the background, waiting to be applied
enum Continuation {
    Transcript {
        recording: u64,
        event: TranscriptEvent,
    },
    TranscriptClosed {
        recording: u64,
    },
    Completion {
        conversation_id: String,
        result: std::result::Result<ChatCompletion, CompletionError>,
    },
}

/// Owns the active conversation and its orchestration state
pub struct SessionController {
    collaborators: Collaborators,
    state: SessionState,
    observers: watch::Sender<SessionState>,
    inbox_tx: mpsc::UnboundedSender<Continuation>,
    inbox_rx: mpsc::UnboundedReceiver<Continuation>,
    recording: Option<Box<dyn Recording>>,
    /// Incremented per recording so late events from an old one are dropped
    recording_generation: u64,
    /// Background tasks that still owe a terminal continuation
    outstanding: usize,
}

impl SessionController {
    /// Create a controller with a fresh conversation
    #[must_use]
    pub fn new(collaborators: Collaborators) -> Self {
        let state = SessionState {
            turns: Vec::new(),
            pending_input: String::new(),
            recording: RecordingState::Idle,
            dispatch: DispatchState::Idle,
            conversation_id: String::new(),
            selected_timestamp: None,
            started_at: None,
        };
        let (observers, _) = watch::channel(state.clone());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let mut controller = Self {
            collaborators,
            state,
            observers,
            inbox_tx,
            inbox_rx,
            recording: None,
            recording_generation: 0,
            outstanding: 0,
        };
        controller.start_new_conversation();
        controller
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Observe every state change
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.observers.subscribe()
    }

    /// Reset to a new, unpersisted conversation
    ///
    /// An in-flight request is not cancelled; its reply will be discarded.
    pub fn start_new_conversation(&mut self) {
        let status = self.collaborators.transcription.status();

        self.state.turns = vec![Turn::generate(Role::System, &status.summary())];
        self.state.conversation_id = new_id();
        self.state.selected_timestamp = None;
        self.state.started_at = None;

        tracing::info!(conversation_id = %self.state.conversation_id, "new conversation");
        self.publish();
    }

    /// Replace the active conversation with a stored snapshot
    ///
    /// Malformed snapshots are ignored.
    pub fn load_conversation(&mut self, snapshot: &Conversation) {
        if let Some(defect) = snapshot.defect() {
            tracing::warn!(
                conversation_id = %snapshot.conversation_id,
                defect,
                "ignoring malformed conversation"
            );
            return;
        }

        self.state.turns.clone_from(&snapshot.turns);
        self.state.conversation_id.clone_from(&snapshot.conversation_id);
        self.state.selected_timestamp = Some(snapshot.updated_at);
        self.state.started_at = Some(snapshot.started_at);

        tracing::info!(
            conversation_id = %snapshot.conversation_id,
            turns = snapshot.turns.len(),
            "conversation loaded"
        );
        self.publish();
    }

    /// Load a conversation picked from the history list
    pub fn select_past_conversation(&mut self, snapshot: &Conversation) {
        self.load_conversation(snapshot);
    }

    /// Replace the pending input with typed text
    pub fn set_pending_input(&mut self, text: &str) {
        text.clone_into(&mut self.state.pending_input);
        self.publish();
    }

    /// Send typed text as the next user turn
    ///
    /// Pending input is left untouched when a reply is still awaited, so an
    /// unsent transcript survives the rejection.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if a reply is still awaited or `text` is blank
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        if self.state.dispatch == DispatchState::AwaitingResponse {
            return reject("a message is already awaiting a reply");
        }

        self.set_pending_input(text);
        self.dispatch_message()
    }

    /// Open a transcription subscription
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if already recording, or the source's error if
    /// it cannot start
    pub fn begin_recording(&mut self) -> Result<()> {
        if self.state.recording == RecordingState::Recording {
            return reject("already recording");
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let handle = self
            .collaborators
            .transcription
            .start(events_tx)
            .inspect_err(|e| tracing::warn!(error = %e, "could not start recording"))?;

        self.recording_generation += 1;
        let recording = self.recording_generation;
        let inbox = self.inbox_tx.clone();
        self.outstanding += 1;

        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let terminal = event.is_terminal();
                if inbox
                    .send(Continuation::Transcript { recording, event })
                    .is_err()
                    || terminal
                {
                    return;
                }
            }
            let _ = inbox.send(Continuation::TranscriptClosed { recording });
        });

        self.recording = Some(handle);
        self.state.recording = RecordingState::Recording;
        self.state.pending_input.clear();

        tracing::debug!(recording, "recording");
        self.publish();
        Ok(())
    }

    /// Ask the source to stop
    ///
    /// The controller stays in `Recording` until the source acknowledges.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if not recording
    pub fn end_recording(&mut self) -> Result<()> {
        if self.state.recording == RecordingState::Idle {
            return reject("not recording");
        }

        if let Some(handle) = self.recording.as_mut() {
            handle.finish();
        }
        tracing::debug!("stop requested");
        Ok(())
    }

    /// Send the pending input as a user turn
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if a reply is still awaited or there is nothing
    /// to send
    pub fn dispatch_message(&mut self) -> Result<()> {
        if self.state.dispatch == DispatchState::AwaitingResponse {
            return reject("a message is already awaiting a reply");
        }
        if self.state.pending_input.trim().is_empty() {
            return reject("nothing to send");
        }

        self.collaborators.speech.stop();

        let turn = Turn::user(&self.state.pending_input);
        self.state.turns.push(turn);
        self.state.pending_input.clear();
        self.state.dispatch = DispatchState::AwaitingResponse;

        let messages: Vec<ChatMessage> = self
            .state
            .dialogue()
            .map(|t| ChatMessage::new(t.role(), t.text()))
            .collect();
        let conversation_id = self.state.conversation_id.clone();
        let client = Arc::clone(&self.collaborators.client);
        let inbox = self.inbox_tx.clone();
        self.outstanding += 1;

        tracing::info!(
            conversation_id = %conversation_id,
            messages = messages.len(),
            "dispatching message"
        );

        tokio::spawn(async move {
            let result = client.complete(messages).await;
            let _ = inbox.send(Continuation::Completion {
                conversation_id,
                result,
            });
        });

        self.publish();
        Ok(())
    }

    /// Speak a turn again with the current voice preferences
    ///
    /// # Errors
    ///
    /// Returns `Precondition` if no turn has that id
    pub fn speak_turn(&self, turn_id: &str) -> Result<()> {
        let Some(turn) = self.state.turns.iter().find(|t| t.id() == turn_id) else {
            return reject("no turn with that id");
        };

        let preferences = VoicePreferences::load(&self.collaborators.storage);
        self.collaborators.speech.speak(turn.text(), preferences);
        Ok(())
    }

    /// Apply the next background result
    ///
    /// Returns `None` once no background work is outstanding.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        while self.outstanding > 0 {
            let continuation = self.inbox_rx.recv().await?;
            if let Some(event) = self.apply(continuation) {
                self.publish();
                return Some(event);
            }
        }
        None
    }

    /// Apply background results until none are outstanding
    pub async fn run_until_idle(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }

    fn apply(&mut self, continuation: Continuation) -> Option<SessionEvent> {
        match continuation {
            Continuation::Transcript { recording, event } => {
                if event.is_terminal() {
                    self.outstanding = self.outstanding.saturating_sub(1);
                }
                if recording != self.recording_generation {
                    tracing::debug!(recording, "dropping event from an old recording");
                    return None;
                }
                Some(self.apply_transcript(event))
            }
            Continuation::TranscriptClosed { recording } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                if recording != self.recording_generation
                    || self.state.recording == RecordingState::Idle
                {
                    return None;
                }
                self.stop_recording();
                Some(SessionEvent::RecordingStopped { error: None })
            }
            Continuation::Completion {
                conversation_id,
                result,
            } => {
                self.outstanding = self.outstanding.saturating_sub(1);
                Some(self.apply_completion(&conversation_id, result))
            }
        }
    }

    fn apply_transcript(&mut self, event: TranscriptEvent) -> SessionEvent {
        match event {
            TranscriptEvent::Partial(text) => {
                self.state.pending_input.clone_from(&text);
                SessionEvent::TranscriptUpdated {
                    text,
                    is_final: false,
                }
            }
            TranscriptEvent::Final(text) => {
                self.state.pending_input.clone_from(&text);
                self.stop_recording();
                SessionEvent::TranscriptUpdated {
                    text,
                    is_final: true,
                }
            }
            TranscriptEvent::Error(error) => {
                tracing::warn!(error = %error, "transcription failed");
                self.stop_recording();
                SessionEvent::RecordingStopped { error: Some(error) }
            }
        }
    }

    fn stop_recording(&mut self) {
        self.recording = None;
        self.state.recording = RecordingState::Idle;
        tracing::debug!("recording stopped");
    }

    fn apply_completion(
        &mut self,
        conversation_id: &str,
        result: std::result::Result<ChatCompletion, CompletionError>,
    ) -> SessionEvent {
        self.state.dispatch = DispatchState::Idle;

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                tracing::warn!(conversation_id, error = %e, "message not sent");
                return SessionEvent::DispatchFailed(e);
            }
        };

        let storage = &self.collaborators.storage;
        match storage.usage().add(completion.usage.total_tokens) {
            Ok(total) => tracing::debug!(
                tokens = completion.usage.total_tokens,
                total,
                "usage recorded"
            ),
            Err(e) => tracing::warn!(error = %e, "failed to record usage"),
        }

        if conversation_id != self.state.conversation_id {
            tracing::info!(conversation_id, "discarding reply for inactive conversation");
            return SessionEvent::StaleReplyDiscarded {
                conversation_id: conversation_id.to_string(),
            };
        }

        if completion.message.content.trim().is_empty() {
            let e = CompletionError::MalformedResponse("reply has no content".to_string());
            tracing::warn!(conversation_id, error = %e, "message not sent");
            return SessionEvent::DispatchFailed(e);
        }

        let id = if completion.id.is_empty()
            || self.state.turns.iter().any(|t| t.id() == completion.id)
        {
            new_id()
        } else {
            completion.id
        };
        let turn = Turn::new(id, completion.message.role, &completion.message.content);
        self.state.turns.push(turn.clone());

        self.collaborators
            .speech
            .speak(turn.text(), VoicePreferences::load(storage));
        self.persist();

        tracing::info!(conversation_id, turn_id = turn.id(), "reply received");
        SessionEvent::ReplyReceived(turn)
    }

    fn persist(&mut self) {
        let now = Utc::now();
        let started_at = *self.state.started_at.get_or_insert(now);
        let snapshot =
            Conversation::snapshot(&self.state.conversation_id, &self.state.turns, started_at, now);

        if !self.collaborators.storage.conversations().save(snapshot) {
            tracing::error!(
                conversation_id = %self.state.conversation_id,
                "failed to persist conversation"
            );
        }
    }

    fn publish(&self) {
        self.observers.send_replace(self.state.clone());
    }
}

fn reject(reason: &'static str) -> Result<()> {
    tracing::warn!(reason, "operation rejected");
    Err(Error::Precondition(reason))
}
