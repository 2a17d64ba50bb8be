//! reqwest-backed speech-synthesis transport (ElevenLabs-compatible).

use async_trait::async_trait;
use tracing::debug;

use super::{SpeechRequest, SpeechTransport, build_client, map_http_error};
use crate::config::{SpeechSettings, VoiceCredentials};
use crate::error::{FortuneError, Result};
use crate::playback::AudioClip;

/// POSTs [`SpeechRequest`]s to `{base_url}/v1/text-to-speech/{voice_id}`.
///
/// The voice id is percent-encoded as one path segment.
pub struct HttpSpeechTransport {
    endpoint: reqwest::Url,
    credentials: VoiceCredentials,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpSpeechTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSpeechTransport")
            .field("endpoint", &self.endpoint.as_str())
            .field("voice_id", &self.credentials.voice_id)
            .finish()
    }
}

impl HttpSpeechTransport {
    /// Create a transport for the given service and voice.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not a usable URL or the HTTP
    /// client cannot be built.
    pub fn new(base_url: impl Into<String>, credentials: VoiceCredentials) -> Result<Self> {
        Self::with_timeout(base_url, credentials, 0)
    }

    /// Create a transport with a whole-request timeout in seconds (0 = none).
    ///
    /// # Errors
    ///
    /// Returns [`FortuneError::Config`] if `base_url` is not a usable URL,
    /// or an error if the HTTP client cannot be built.
    pub fn with_timeout(
        base_url: impl Into<String>,
        credentials: VoiceCredentials,
        timeout_secs: u64,
    ) -> Result<Self> {
        let base_url: String = base_url.into();
        Ok(Self {
            endpoint: endpoint(&base_url, &credentials.voice_id)?,
            credentials,
            client: build_client(timeout_secs)?,
        })
    }

    /// Create a transport from the `[speech]` section, applying env fallbacks.
    ///
    /// # Errors
    ///
    /// Returns [`FortuneError::ConfigurationGap`] when the voice id or API
    /// key is missing, or an error if the HTTP client cannot be built.
    pub fn from_config(settings: &SpeechSettings) -> Result<Self> {
        let credentials = settings.resolve().ok_or_else(|| {
            FortuneError::ConfigurationGap("speech voice id or API key not set".into())
        })?;
        Self::with_timeout(
            settings.base_url.clone(),
            credentials,
            settings.request_timeout_secs,
        )
    }
}

fn endpoint(base_url: &str, voice_id: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(base_url)
        .map_err(|e| FortuneError::Config(format!("invalid speech base_url {base_url:?}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| FortuneError::Config(format!("speech base_url {base_url:?} cannot take a path")))?
        .pop_if_empty()
        .extend(["v1", "text-to-speech", voice_id]);
    Ok(url)
}

#[async_trait]
impl SpeechTransport for HttpSpeechTransport {
    async fn synthesize(&self, request: &SpeechRequest) -> Result<AudioClip> {
        debug!(url = %self.endpoint, chars = request.text.len(), "sending speech request");

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("xi-api-key", &self.credentials.api_key)
            .header("Accept", "audio/mpeg")
            .json(request)
            .send()
            .await
            .map_err(|e| FortuneError::Transport(format!("speech request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error("speech", status, &body));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FortuneError::Transport(format!("speech audio unreadable: {e}")))?;

        Ok(AudioClip::new(bytes, content_type))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    fn creds() -> VoiceCredentials {
        VoiceCredentials {
            voice_id: "voice123".to_owned(),
            api_key: "secret".to_owned(),
        }
    }

    #[test]
    fn url_includes_voice_and_trims_slash() {
        let transport = HttpSpeechTransport::new("https://tts.example/", creds()).unwrap();
        assert_eq!(
            transport.endpoint.as_str(),
            "https://tts.example/v1/text-to-speech/voice123"
        );
        let prefixed = HttpSpeechTransport::new("https://tts.example/api/", creds()).unwrap();
        assert_eq!(
            prefixed.endpoint.as_str(),
            "https://tts.example/api/v1/text-to-speech/voice123"
        );
    }

    #[test]
    fn voice_id_cannot_escape_its_path_segment() {
        let credentials = VoiceCredentials {
            voice_id: "a/b?c#d".to_owned(),
            api_key: "secret".to_owned(),
        };
        let transport = HttpSpeechTransport::new("https://tts.example", credentials).unwrap();
        let url = &transport.endpoint;
        assert_eq!(url.path(), "/v1/text-to-speech/a%2Fb%3Fc%23d");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn unusable_base_url_is_config_error() {
        for base in ["not a url", "mailto:tts@example.com"] {
            let err = HttpSpeechTransport::new(base, creds()).unwrap_err();
            assert!(matches!(err, FortuneError::Config(_)), "{base}: {err}");
        }
    }

    #[test]
    fn debug_does_not_leak_key() {
        let transport = HttpSpeechTransport::new("https://tts.example", creds()).unwrap();
        assert!(!format!("{transport:?}").contains("secret"));
    }
}
