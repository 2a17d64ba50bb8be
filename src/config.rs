//! Configuration types for the fortune-reading session.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Number of chat attempts per turn before a malformed reply aborts it.
///
/// Fixed; not exposed in the config file.
pub const MAX_PARSE_ATTEMPTS: usize = 3;

/// Environment variable consulted when `speech.voice_id` is blank.
pub const VOICE_ID_ENV: &str = "ELEVENLABS_VOICE_ID";
/// Environment variable consulted when `speech.api_key` is blank.
pub const SPEECH_API_KEY_ENV: &str = "ELEVENLABS_API_KEY";
/// Environment variable consulted when `chat.api_key` is blank.
pub const CHAT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Top-level configuration for a reading session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FortuneConfig {
    /// Chat-completion endpoint and prompts.
    pub chat: ChatConfig,
    /// Speech-synthesis endpoint and voice parameters.
    pub speech: SpeechSettings,
    /// Optional scripted opening.
    pub intro: IntroConfig,
    /// Background music layer.
    pub music: MusicConfig,
    /// Host-facing presentation options.
    pub ui: UiConfig,
}

/// Chat-completion configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Full URL of the chat-completions endpoint.
    pub endpoint_url: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Bearer token. Blank falls back to `OPENAI_API_KEY`; still blank sends no header.
    pub api_key: String,
    /// First message of the transcript.
    pub system_prompt: String,
    /// User turn sent when the session opens without a scripted question.
    ///
    /// Leave empty to wait for the first user action instead.
    pub opening_prompt: String,
    /// Client-side request timeout in seconds (0 = rely on the transport).
    pub request_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "https://api.openai.com/v1/chat/completions".to_owned(),
            model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            opening_prompt: "Greet me and begin the reading.".to_owned(),
            request_timeout_secs: 0,
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = "You are a fortune teller giving a spoken tarot reading.\n\
Keep each reply to two or three short sentences meant to be read aloud.\n\
Do not describe actions or stage directions.\n\
Always reply with ONLY a JSON object of the form \
{\"spoken\": \"<what you say>\", \"choices\": [\"<option 1>\", \"<option 2>\", \"<option 3>\"]}.\n\
The choices are three short things the visitor may say next.";

impl ChatConfig {
    /// The bearer token to send, after the environment fallback.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.resolved_api_key_with(|name| std::env::var(name).ok())
    }

    /// Like [`Self::resolved_api_key`] with an injectable environment lookup.
    pub fn resolved_api_key_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<String> {
        non_blank_or_env(&self.api_key, CHAT_API_KEY_ENV, &env)
    }
}

/// Speech-synthesis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    /// Base URL of the speech service (`/v1/text-to-speech/{voice}` is appended).
    pub base_url: String,
    /// Voice identifier. Blank falls back to `ELEVENLABS_VOICE_ID`.
    pub voice_id: String,
    /// Synthesis model identifier.
    pub model_id: String,
    /// API key. Blank falls back to `ELEVENLABS_API_KEY`.
    pub api_key: String,
    /// Voice stability (0.0–1.0), snapped to a preset before sending.
    pub stability: f32,
    /// Similarity boost (0.0–1.0), clamped before sending.
    pub similarity_boost: f32,
    /// Client-side request timeout in seconds (0 = rely on the transport).
    pub request_timeout_secs: u64,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.elevenlabs.io".to_owned(),
            voice_id: String::new(),
            model_id: "eleven_multilingual_v2".to_owned(),
            api_key: String::new(),
            stability: 0.5,
            similarity_boost: 0.75,
            request_timeout_secs: 0,
        }
    }
}

/// Voice credentials after applying environment fallbacks.
#[derive(Clone, PartialEq, Eq)]
pub struct VoiceCredentials {
    /// Voice identifier.
    pub voice_id: String,
    /// API key.
    pub api_key: String,
}

impl std::fmt::Debug for VoiceCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceCredentials")
            .field("voice_id", &self.voice_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl SpeechSettings {
    /// Resolve voice credentials from config, then the process environment.
    ///
    /// Returns `None` when either value is still blank; speech then runs
    /// text-only for the whole session.
    pub fn resolve(&self) -> Option<VoiceCredentials> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Like [`Self::resolve`] with an injectable environment lookup.
    pub fn resolve_with(&self, env: impl Fn(&str) -> Option<String>) -> Option<VoiceCredentials> {
        let voice_id = non_blank_or_env(&self.voice_id, VOICE_ID_ENV, &env)?;
        let api_key = non_blank_or_env(&self.api_key, SPEECH_API_KEY_ENV, &env)?;
        Some(VoiceCredentials { voice_id, api_key })
    }
}

fn non_blank_or_env(
    value: &str,
    var: &str,
    env: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let value = value.trim();
    if !value.is_empty() {
        return Some(value.to_owned());
    }
    env(var)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// Scripted opening played before the first model turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntroConfig {
    /// Pre-recorded intro audio.
    pub clip: Option<PathBuf>,
    /// Intro line shown (and logged as an assistant turn).
    pub text: String,
    /// Literal opening question, shown without contacting the chat endpoint.
    pub question: String,
    /// Pre-authored answers to `question`. Ignored when empty.
    pub choices: Vec<String>,
}

impl IntroConfig {
    /// Whether there is anything to play or show during intro playback.
    pub fn has_playback(&self) -> bool {
        self.clip.is_some() || !self.text.trim().is_empty()
    }

    /// Whether the first turn is scripted (question plus choices).
    pub fn has_scripted_question(&self) -> bool {
        !self.question.trim().is_empty() && !self.choices.is_empty()
    }
}

/// Background music layer, independent of turn-taking.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MusicConfig {
    /// Music clip to loop under the reading.
    pub clip: Option<PathBuf>,
    /// Output volume (0.0–1.0).
    pub volume: f32,
    /// Restart the clip when it ends.
    pub looped: bool,
    /// Start as soon as the session starts.
    pub autoplay: bool,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            clip: None,
            volume: 0.3,
            looped: true,
            autoplay: true,
        }
    }
}

/// Host-facing presentation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    /// Boolean animation parameter raised while speech plays.
    pub talking_param: String,
    /// Log every transcript append at info level.
    pub log_transcript: bool,
    /// Input that requests a skip of the intro.
    pub skip_key: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            talking_param: "isTalking".to_owned(),
            log_transcript: false,
            skip_key: "s".to_owned(),
        }
    }
}

impl FortuneConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::FortuneError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::FortuneError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/fortune/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::env::temp_dir().join("fortune-config"))
            .join("fortune")
            .join("config.toml")
    }
}
