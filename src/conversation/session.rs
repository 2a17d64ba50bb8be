use tracing::{debug, info};

use super::message::{ChatMessage, ConversationLog};
use super::state::ConversationState;
use crate::reply::CHOICE_COUNT;

/// Everything a reading session owns: transcript, choices on screen, state.
///
/// One instance lives inside each [`Orchestrator`](super::Orchestrator);
/// there is no process-wide session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    log: ConversationLog,
    choices: Option<[String; CHOICE_COUNT]>,
    state: ConversationState,
    log_transcript: bool,
}

impl SessionContext {
    pub fn new(system_prompt: impl Into<String>, log_transcript: bool) -> Self {
        Self {
            log: ConversationLog::new(system_prompt),
            choices: None,
            state: ConversationState::Idle,
            log_transcript,
        }
    }

    /// Append to the transcript, echoing it on `fortune::transcript` when enabled.
    pub fn append(&mut self, message: ChatMessage) {
        if self.log_transcript {
            info!(target: "fortune::transcript", role = %message.role, "{}", message.content);
        }
        self.log.push(message);
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    pub fn choices(&self) -> Option<&[String; CHOICE_COUNT]> {
        self.choices.as_ref()
    }

    pub fn set_choices(&mut self, choices: [String; CHOICE_COUNT]) {
        self.choices = Some(choices);
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    /// Move to `next`, returning the state that was left.
    pub fn transition(&mut self, next: ConversationState) -> ConversationState {
        let previous = std::mem::replace(&mut self.state, next);
        if previous != next {
            debug!(from = %previous, to = %next, "state transition");
        }
        previous
    }
}
