//! Chat-completion and speech-synthesis transports.
//!
//! The orchestrator talks to both endpoints through the [`ChatTransport`] and
//! [`SpeechTransport`] traits. [`HttpChatTransport`] and
//! [`HttpSpeechTransport`] are the reqwest-backed implementations; tests swap
//! in scripted ones.

mod chat;
mod request;
mod speech;

pub use chat::HttpChatTransport;
pub use request::{
    ChatRequest, STABILITY_PRESETS, SpeechRequest, VoiceSettings, clamp_unit, snap_stability,
};
pub use speech::HttpSpeechTransport;

use async_trait::async_trait;

use crate::error::{FortuneError, Result};
use crate::playback::AudioClip;

/// Sends a chat request and returns the raw response body.
///
/// Implementations never retry; the orchestrator owns retry policy.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// POST the request and return the response body text.
    async fn send(&self, request: &ChatRequest) -> Result<String>;
}

/// Turns text into an audio clip.
#[async_trait]
pub trait SpeechTransport: Send + Sync {
    /// POST the request and return the synthesized audio.
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioClip>;
}

/// Build a reqwest client with an optional whole-request timeout (0 = none).
fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if timeout_secs > 0 {
        builder = builder.timeout(std::time::Duration::from_secs(timeout_secs));
    }
    builder
        .build()
        .map_err(|e| FortuneError::Config(format!("cannot build HTTP client: {e}")))
}

/// Map an HTTP error status to the appropriate [`FortuneError`].
fn map_http_error(service: &str, status: reqwest::StatusCode, body: &str) -> FortuneError {
    let message = extract_error_message(body);
    match status.as_u16() {
        401 | 403 => FortuneError::Auth(format!("{service} authentication failed: {message}")),
        code => FortuneError::Transport(format!("{service} HTTP {code}: {message}")),
    }
}

/// Pull a diagnostic message out of an error body.
///
/// Understands `{"error": {"message": ...}}`, `{"detail": {"message": ...}}`
/// and `{"detail": "..."}`; anything else is returned verbatim.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            let nested = |key: &str| {
                v.get(key)
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .map(String::from)
            };
            nested("error")
                .or_else(|| nested("detail"))
                .or_else(|| v.get("detail").and_then(|d| d.as_str()).map(String::from))
        })
        .unwrap_or_else(|| body.trim().to_string())
}
