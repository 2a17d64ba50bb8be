//! reqwest-backed chat-completion transport.

use async_trait::async_trait;
use tracing::debug;

use super::{ChatRequest, ChatTransport, build_client, map_http_error};
use crate::config::ChatConfig;
use crate::error::{FortuneError, Result};

/// POSTs [`ChatRequest`]s to an OpenAI-compatible chat-completions URL.
pub struct HttpChatTransport {
    endpoint_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpChatTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpChatTransport")
            .field("endpoint_url", &self.endpoint_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

impl HttpChatTransport {
    /// Create a transport for the given endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(endpoint_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        Self::with_timeout(endpoint_url, api_key, 0)
    }

    /// Create a transport with a whole-request timeout in seconds (0 = none).
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(
        endpoint_url: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        Ok(Self {
            endpoint_url: endpoint_url.into(),
            api_key,
            client: build_client(timeout_secs)?,
        })
    }

    /// Create a transport from the `[chat]` config section.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(config: &ChatConfig) -> Result<Self> {
        Self::with_timeout(
            config.endpoint_url.clone(),
            config.resolved_api_key(),
            config.request_timeout_secs,
        )
    }
}

#[async_trait]
impl ChatTransport for HttpChatTransport {
    async fn send(&self, request: &ChatRequest) -> Result<String> {
        debug!(
            url = %self.endpoint_url,
            messages = request.messages.len(),
            "sending chat request"
        );

        let mut builder = self
            .client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder
            .json(request)
            .send()
            .await
            .map_err(|e| FortuneError::Transport(format!("chat request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| FortuneError::Transport(format!("chat response unreadable: {e}")))?;

        if !status.is_success() {
            return Err(map_http_error("chat", status, &body));
        }
        Ok(body)
    }
}
