use std::sync::{Arc, Mutex};
use std::time::Duration;

use chess_core::{ChatRequest, EventFrame, FrameDecoder, Message, Role};
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Shown in place of an answer when the stream breaks
pub const FALLBACK_MESSAGE: &str =
    "Sorry, something went wrong while answering. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The termination frame arrived
    Completed,
    /// Stopped through a [`CancelHandle`]; applied deltas are kept
    Cancelled,
    /// Transport or server failure; a fallback message was appended
    Failed(String),
}

/// HTTP access to the relay
#[derive(Clone)]
pub struct ChatClient {
    client: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/');
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        let client = Client::builder()
            .user_agent("AlpineChessChat/1.0")
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Aborts the in-flight turn. Clones control the same session.
#[derive(Clone, Default)]
pub struct CancelHandle {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl CancelHandle {
    /// Cancel the in-flight turn. Returns false (and does nothing) when no
    /// turn is running.
    pub fn cancel(&self) -> bool {
        let token = self.current.lock().ok().and_then(|mut c| c.take());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Ok(mut current) = self.current.lock() {
            if let Some(previous) = current.replace(token.clone()) {
                previous.cancel();
            }
        }
        token
    }

    fn finish(&self) {
        if let Ok(mut current) = self.current.lock() {
            current.take();
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// One conversation. `send` is the only writer; renderers watch the reply
/// through [`ChatSession::subscribe`].
pub struct ChatSession {
    client: ChatClient,
    messages: Vec<Message>,
    cancel: CancelHandle,
    reply: watch::Sender<String>,
}

impl ChatSession {
    pub fn new(client: ChatClient) -> Self {
        let (reply, _) = watch::channel(String::new());
        Self {
            client,
            messages: Vec::new(),
            cancel: CancelHandle::default(),
            reply,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// The assistant reply being streamed, updated after every delta
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.reply.subscribe()
    }

    /// Send a question about `position` and stream the reply into the
    /// conversation. Any turn still in flight is cancelled first.
    pub async fn send(&mut self, question: &str, position: &str, model: &str) -> TurnOutcome {
        let token = self.cancel.begin();
        let outcome = self.run_turn(question, position, model, &token).await;
        self.cancel.finish();

        match &outcome {
            TurnOutcome::Completed => info!("Turn completed"),
            TurnOutcome::Cancelled => info!("Turn cancelled"),
            TurnOutcome::Failed(reason) => warn!(%reason, "Turn failed"),
        }
        outcome
    }

    async fn run_turn(
        &mut self,
        question: &str,
        position: &str,
        model: &str,
        token: &CancellationToken,
    ) -> TurnOutcome {
        self.messages.push(Message::user(question));
        let request = ChatRequest {
            messages: self.messages.clone(),
            position: position.to_string(),
            model: model.to_string(),
        };
        self.messages.push(Message::assistant(""));
        self.reply.send_replace(String::new());

        let pending = self
            .client
            .client
            .post(self.client.chat_url())
            .json(&request)
            .send();
        let sent = tokio::select! {
            _ = token.cancelled() => None,
            resp = pending => Some(resp),
        };

        let resp = match sent {
            None => return self.cancelled(),
            Some(Ok(resp)) => resp,
            Some(Err(e)) => return self.fail(format!("Request error: {e}")),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = match resp.json::<ErrorBody>().await {
                Ok(body) => body.error,
                Err(_) => format!("HTTP {status}"),
            };
            return self.fail(detail);
        }

        let mut stream = resp.bytes_stream();
        let mut decoder = FrameDecoder::new();

        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => None,
                chunk = stream.next() => Some(chunk),
            };
            let Some(chunk) = chunk else {
                return self.cancelled();
            };

            let frames = match chunk {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(e)) => return self.fail(format!("Stream error: {e}")),
                None => match decoder.finish() {
                    Some(frame) => vec![frame],
                    None => return self.fail("Stream ended before completion".into()),
                },
            };

            for frame in frames {
                if token.is_cancelled() {
                    return self.cancelled();
                }
                match frame {
                    Ok(EventFrame::Delta(text)) => self.apply_delta(&text),
                    Ok(EventFrame::Done) => return TurnOutcome::Completed,
                    Err(e) => warn!(error = %e, "Skipping malformed frame"),
                }
            }
        }
    }

    /// Append to the last assistant message
    fn apply_delta(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(last) = self.messages.last_mut().filter(|m| m.role == Role::Assistant) {
            last.content.push_str(text);
            self.reply.send_modify(|reply| reply.push_str(text));
        }
    }

    fn drop_empty_placeholder(&mut self) {
        if self
            .messages
            .last()
            .is_some_and(|m| m.role == Role::Assistant && m.content.is_empty())
        {
            self.messages.pop();
        }
    }

    fn cancelled(&mut self) -> TurnOutcome {
        debug!("Cancellation observed");
        self.drop_empty_placeholder();
        TurnOutcome::Cancelled
    }

    fn fail(&mut self, reason: String) -> TurnOutcome {
        self.drop_empty_placeholder();
        self.messages.push(Message::assistant(FALLBACK_MESSAGE));
        TurnOutcome::Failed(reason)
    }
}
