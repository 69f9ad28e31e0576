//! Observable session state

use chrono::{DateTime, Local, Utc};

use super::turn::Turn;

/// Whether a transcription subscription is open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
}

/// Whether a completion request is outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Idle,
    AwaitingResponse,
}

/// Everything the presentation layer renders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub turns: Vec<Turn>,
    pub pending_input: String,
    pub recording: RecordingState,
    pub dispatch: DispatchState,
    pub conversation_id: String,
    /// Stored time of the past conversation being shown, if any
    pub selected_timestamp: Option<DateTime<Utc>>,
    /// When this conversation was first persisted
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionState {
    /// Header label: `"Today"` for a live session, else the selected time
    #[must_use]
    pub fn date_label(&self) -> String {
        self.selected_timestamp.map_or_else(
            || "Today".to_string(),
            |ts| ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
        )
    }

    /// Turns sent to the completion endpoint
    pub fn dialogue(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter().filter(|t| t.role() != super::Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    fn state() -> SessionState {
        SessionState {
            turns: vec![
                Turn::new("s", Role::System, "Recognition denied\nAudio denied"),
                Turn::new("u", Role::User, "hello"),
            ],
            pending_input: String::new(),
            recording: RecordingState::Idle,
            dispatch: DispatchState::Idle,
            conversation_id: "c1".to_string(),
            selected_timestamp: None,
            started_at: None,
        }
    }

    #[test]
    fn live_session_is_today() {
        assert_eq!(state().date_label(), "Today");
    }

    #[test]
    fn selected_session_shows_local_time() {
        let ts = Utc::now();
        let mut state = state();
        state.selected_timestamp = Some(ts);

        let expected = ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string();
        assert_eq!(state.date_label(), expected);
    }

    #[test]
    fn dialogue_skips_system_turns() {
        let state = state();
        let ids: Vec<&str> = state.dialogue().map(Turn::id).collect();
        assert_eq!(ids, vec!["u"]);
    }
}
