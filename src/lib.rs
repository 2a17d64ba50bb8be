//! Fortune: conversational fortune-reading core.
//!
//! A reading alternates between the player picking one of three choices and
//! a chat model answering with one spoken line plus three new choices:
//! Choice → Chat endpoint → Reply parser → Speech endpoint → Speaker
//!
//! # Architecture
//!
//! - **Conversation**: the [`Orchestrator`] owns the transcript and runs one
//!   turn at a time, retrying unparseable replies
//! - **Reply**: recovers `{spoken, choices}` from messy model output
//! - **Transport**: reqwest clients for chat completions and speech synthesis
//! - **Playback**: plays speech clips and raises the talking flag while they run
//! - **UI**: narrow traits the host implements to show text and choices

#[cfg(feature = "device-audio")]
pub mod audio;
pub mod config;
pub mod conversation;
pub mod error;
pub mod playback;
pub mod reply;
pub mod sanitize;
pub mod transport;
pub mod ui;

pub use config::FortuneConfig;
pub use conversation::{Collaborators, ConversationState, Orchestrator, TurnOutcome};
pub use error::{FortuneError, Result};
pub use reply::{FortuneResponse, ParseOutcome};
pub use ui::{Animator, ReadingUi, UiEvent};
