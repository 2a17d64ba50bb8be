//! Structured replies extracted from model output.
//!
//! The model is asked for `{"spoken": "...", "choices": ["...", "...", "..."]}`
//! but routinely wraps it in prose, drops fields or answers with a bulleted
//! list instead. [`parse_reply`] recovers a [`FortuneResponse`] from all of
//! those, and [`normalize_choices`] guarantees the player always sees three
//! options.

mod choices;
mod parser;

pub use choices::{CHOICE_COUNT, DEFAULT_CHOICES, FILLER_CHOICE, normalize_choices};
pub use parser::{extract_json_object, parse_reply};

use serde::{Deserialize, Serialize};

/// A structured reply: one spoken line and exactly three choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FortuneResponse {
    /// Sanitized line to speak and display.
    pub spoken: String,
    /// Normalized choices offered to the player.
    pub choices: [String; CHOICE_COUNT],
}

impl FortuneResponse {
    /// Build a response from an already-sanitized line and raw candidate choices.
    pub fn new<S: AsRef<str>>(spoken: impl Into<String>, candidates: &[S]) -> Self {
        Self {
            spoken: spoken.into(),
            choices: normalize_choices(candidates),
        }
    }

    /// Serialize to the canonical transcript form.
    pub fn to_canonical_json(&self) -> String {
        // Two string fields and a string array cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Result of parsing one transport payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// A usable reply plus the JSON text to record as the assistant turn.
    Success {
        /// The extracted reply.
        response: FortuneResponse,
        /// Canonical JSON appended to the transcript.
        canonical_json: String,
    },
    /// Nothing usable. The reason is for diagnostics only.
    Failure {
        /// Human-readable cause.
        reason: String,
    },
}

impl ParseOutcome {
    pub(crate) fn failure(reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
        }
    }

    /// Whether this outcome carries a reply.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Turns a raw transport payload into a [`ParseOutcome`].
///
/// The orchestrator depends on this trait rather than on [`parse_reply`]
/// directly so tests can script parser behaviour.
pub trait ReplyParser: Send + Sync {
    /// Parse one raw chat-completion payload.
    fn parse(&self, payload: &str) -> ParseOutcome;
}

/// The layered parser used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredReplyParser;

impl ReplyParser for StructuredReplyParser {
    fn parse(&self, payload: &str) -> ParseOutcome {
        parse_reply(payload)
    }
}
