//! Conversation session
//!
//! [`SessionController`] owns the active conversation and mediates between
//! the transcription source, the completion client, speech output and the
//! local store. All mutation happens on the task that owns the controller;
//! background work reports back through its inbox and is applied by
//! [`SessionController::next_event`].

mod controller;
mod state;
mod turn;

pub use controller::{Collaborators, SessionController, SessionEvent};
pub use state::{DispatchState, RecordingState, SessionState};
pub use turn::{Conversation, Role, Turn, new_id};
