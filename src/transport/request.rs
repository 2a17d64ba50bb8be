//! Outbound request bodies for the chat and speech endpoints.

use serde::Serialize;

use crate::conversation::ChatMessage;

/// Stability presets the speech endpoint is actually sent.
pub const STABILITY_PRESETS: [f32; 3] = [0.0, 0.5, 1.0];

/// Chat-completion request body: `{model, messages}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    /// Model identifier.
    pub model: String,
    /// Transcript snapshot, system prompt first.
    pub messages: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Build a request from a transcript snapshot.
    pub fn new(model: impl Into<String>, messages: &[ChatMessage]) -> Self {
        Self {
            model: model.into(),
            messages: messages.to_vec(),
        }
    }
}

/// Voice parameters sent with a speech request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    /// Snapped stability preset.
    pub stability: f32,
    /// Clamped similarity boost.
    pub similarity_boost: f32,
}

/// Speech-synthesis request body: `{text, model_id, voice_settings}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechRequest {
    /// Text to speak.
    pub text: String,
    /// Synthesis model identifier.
    pub model_id: String,
    /// Voice parameters, already snapped/clamped.
    pub voice_settings: VoiceSettings,
}

impl SpeechRequest {
    /// Build a speech request, snapping stability and clamping similarity.
    pub fn new(
        text: impl Into<String>,
        model_id: impl Into<String>,
        stability: f32,
        similarity_boost: f32,
    ) -> Self {
        Self {
            text: text.into(),
            model_id: model_id.into(),
            voice_settings: VoiceSettings {
                stability: snap_stability(stability),
                similarity_boost: clamp_unit(similarity_boost),
            },
        }
    }
}

/// Snap a stability value to the nearest of [`STABILITY_PRESETS`].
///
/// Ties go to the earlier preset, so exactly 0.25 snaps to 0.0 and 0.75 to
/// 0.5. NaN snaps to the first preset.
pub fn snap_stability(value: f32) -> f32 {
    let mut best = STABILITY_PRESETS[0];
    let mut best_distance = (value - best).abs();
    for preset in &STABILITY_PRESETS[1..] {
        let distance = (value - preset).abs();
        if distance < best_distance {
            best = *preset;
            best_distance = distance;
        }
    }
    best
}

/// Clamp to `[0, 1]`; NaN becomes 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
