//! Error types for the fortune-reading core.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`FortuneError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Network or HTTP failure talking to the chat or speech endpoint.
    pub const TRANSPORT_FAILED: &str = "TRANSPORT_FAILED";

    /// The endpoint rejected our credentials.
    pub const AUTH_FAILED: &str = "AUTH_FAILED";

    /// Model output could not be turned into a structured reply.
    pub const PARSE_FAILED: &str = "PARSE_FAILED";

    /// Audio could not be decoded or played.
    pub const PLAYBACK_FAILED: &str = "PLAYBACK_FAILED";

    /// Invalid configuration file or value.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Required credentials are missing; the feature runs degraded.
    pub const CONFIG_GAP: &str = "CONFIG_GAP";

    /// Filesystem or stream I/O failure.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the fortune-reading core.
#[derive(Debug, thiserror::Error)]
pub enum FortuneError {
    /// Network/HTTP failure. Never retried; aborts the current turn.
    #[error("[{}] {}", error_codes::TRANSPORT_FAILED, .0)]
    Transport(String),

    /// Authentication failed (401/403).
    #[error("[{}] {}", error_codes::AUTH_FAILED, .0)]
    Auth(String),

    /// Every attempt of a turn produced malformed or off-schema output.
    #[error("[{}] {}", error_codes::PARSE_FAILED, .0)]
    Parse(String),

    /// Speech audio could not be produced or played.
    #[error("[{}] {}", error_codes::PLAYBACK_FAILED, .0)]
    Playback(String),

    /// Configuration could not be read, parsed or written.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Credentials missing for an optional capability.
    #[error("[{}] {}", error_codes::CONFIG_GAP, .0)]
    ConfigurationGap(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl FortuneError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => error_codes::TRANSPORT_FAILED,
            Self::Auth(_) => error_codes::AUTH_FAILED,
            Self::Parse(_) => error_codes::PARSE_FAILED,
            Self::Playback(_) => error_codes::PLAYBACK_FAILED,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::ConfigurationGap(_) => error_codes::CONFIG_GAP,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Returns the inner message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::Transport(m)
            | Self::Auth(m)
            | Self::Parse(m)
            | Self::Playback(m)
            | Self::Config(m)
            | Self::ConfigurationGap(m) => m.clone(),
            Self::Io(e) => e.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, FortuneError>;
