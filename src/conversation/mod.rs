//! The reading itself: transcript, session state and the turn orchestrator.

mod message;
mod orchestrator;
mod session;
mod state;

pub use message::{ChatMessage, ConversationLog, Role};
pub use orchestrator::{CORRECTIVE_INSTRUCTION, Collaborators, Orchestrator, TurnOutcome};
pub use session::SessionContext;
pub use state::ConversationState;
