//! Streaming clients for model providers.
//!
//! [`ProviderClient::open_stream`] returns the provider's SSE events as raw
//! [`RawChunk`]s, in receipt order. Interpreting them is left to
//! [`ProviderKind::decode`] so the transcoder sees one shape per provider.

pub mod anthropic;
pub mod openai;

use std::pin::Pin;
use std::time::Duration;

use chess_core::Message;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{Config, ModelRoute};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible chat completions
    OpenAi,
}

/// Why the provider refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// 401/403: configuration problem, not retried
    CredentialRejected,
    /// 429: the user may retry later
    RateLimited,
    /// 400/404/422: the request we built is wrong
    MalformedRequest,
    /// Anything else non-2xx
    Upstream,
}

impl RejectionKind {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => RejectionKind::CredentialRejected,
            429 => RejectionKind::RateLimited,
            400 | 404 | 413 | 422 => RejectionKind::MalformedRequest,
            _ => RejectionKind::Upstream,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Provider rejected request ({status}, {kind:?}): {message}")]
    Rejected {
        kind: RejectionKind,
        status: u16,
        message: String,
    },

    /// Error event inside an accepted stream
    #[error("Provider stream error: {0}")]
    Stream(String),

    #[error("Provider request cancelled")]
    Cancelled,
}

/// One SSE event exactly as the provider sent it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    /// SSE `event:` field; empty when the provider sends none
    pub event: String,
    pub data: String,
}

impl RawChunk {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }
}

/// A decoded provider chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Delta(String),
    /// Provider says the reply is complete
    Done,
    /// Provider reported an error inside the stream
    Error(String),
    /// Valid chunk with nothing to forward (pings, metadata)
    Ignore,
    /// Could not be parsed
    Malformed(String),
}

impl ProviderKind {
    pub fn decode(&self, chunk: &RawChunk) -> Decoded {
        match self {
            ProviderKind::Anthropic => anthropic::decode(chunk),
            ProviderKind::OpenAi => openai::decode(chunk),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OpenAi => "openai",
        }
    }
}

/// Lazy, finite, non-restartable sequence of provider chunks
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<RawChunk, ProviderError>> + Send>>;

/// Everything needed to open one streaming completion
pub struct ProviderRequest<'a> {
    pub route: &'a ModelRoute,
    pub credential: &'a str,
    /// Conversation without system turns
    pub messages: &'a [Message],
}

#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
    anthropic_base_url: String,
    openai_base_url: String,
    max_tokens: u32,
    idle_timeout: Duration,
}

impl ProviderClient {
    pub fn new(config: &Config) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .user_agent("AlpineChessChat/1.0")
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            anthropic_base_url: config.anthropic_base_url.trim_end_matches('/').to_string(),
            openai_base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            idle_timeout: Duration::from_secs(config.provider_idle_timeout_secs),
        })
    }

    /// Start a streaming completion. Cancelling `cancel` closes the
    /// connection and ends the returned stream.
    pub async fn open_stream(
        &self,
        request: ProviderRequest<'_>,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        let builder = match request.route.provider {
            ProviderKind::Anthropic => anthropic::build_request(
                &self.client,
                &self.anthropic_base_url,
                request.credential,
                &request.route.upstream,
                request.messages,
                self.max_tokens,
            ),
            ProviderKind::OpenAi => openai::build_request(
                &self.client,
                &self.openai_base_url,
                request.credential,
                &request.route.upstream,
                request.messages,
                self.max_tokens,
            ),
        };

        debug!(
            provider = request.route.provider.name(),
            model = %request.route.upstream,
            turns = request.messages.len(),
            "Opening provider stream"
        );

        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
            resp = builder.send() => resp.map_err(|e| ProviderError::Transport(format!("Request error: {e}")))?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let kind = RejectionKind::from_status(status);
            warn!(status = status.as_u16(), ?kind, "Provider rejected request");
            return Err(ProviderError::Rejected {
                kind,
                status: status.as_u16(),
                message: extract_error_message(&body),
            });
        }

        let events = resp.bytes_stream().eventsource().map(|item| match item {
            Ok(event) => Ok(RawChunk {
                event: event.event,
                data: event.data,
            }),
            Err(e) => Err(ProviderError::Transport(format!("SSE stream error: {e}"))),
        });

        let chunks = with_idle_timeout(Box::pin(events), self.idle_timeout)
            .take_until(cancel.cancelled_owned());
        Ok(Box::pin(chunks))
    }
}

/// End the stream with a transport error if no chunk arrives within `idle`.
fn with_idle_timeout(
    events: ChunkStream,
    idle: Duration,
) -> impl Stream<Item = Result<RawChunk, ProviderError>> + Send {
    futures::stream::unfold(Some(events), move |state| async move {
        let mut events = state?;
        match tokio::time::timeout(idle, events.next()).await {
            Ok(Some(item)) => Some((item, Some(events))),
            Ok(None) => None,
            Err(_) => Some((
                Err(ProviderError::Transport(format!(
                    "No data from provider for {}s",
                    idle.as_secs()
                ))),
                None,
            )),
        }
    })
}

/// Pull a human-readable message out of a provider error body
fn extract_error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        let error = v.get("error")?;
        error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .map(String::from)
    });
    match message {
        Some(m) => m,
        None if body.trim().is_empty() => "no response body".to_string(),
        None => body.chars().take(200).collect(),
    }
}
