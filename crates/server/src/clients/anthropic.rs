//! Anthropic Messages API streaming

use chess_core::Message;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Decoded, RawChunk};

const API_VERSION: &str = "2023-06-01";

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    messages: Vec<Turn<'a>>,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    delta: TextDelta,
}

#[derive(Deserialize)]
struct TextDelta {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

pub fn build_request(
    client: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    max_tokens: u32,
) -> RequestBuilder {
    let body = MessagesRequest {
        model,
        max_tokens,
        stream: true,
        messages: messages
            .iter()
            .map(|m| Turn {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
    };

    client
        .post(format!("{base_url}/v1/messages"))
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .header("accept", "text/event-stream")
        .json(&body)
}

/// Map one Anthropic SSE event. The event name comes from the `event:`
/// field, falling back to the `type` inside the payload.
pub fn decode(chunk: &RawChunk) -> Decoded {
    let payload: Option<Value> = serde_json::from_str(&chunk.data).ok();
    let event_type = match chunk.event.as_str() {
        "" | "message" => payload
            .as_ref()
            .and_then(|v| v.get("type"))
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        other => other.to_string(),
    };

    match event_type.as_str() {
        "content_block_delta" => {
            match serde_json::from_str::<ContentBlockDelta>(&chunk.data) {
                Ok(block) if block.delta.kind == "text_delta" => {
                    Decoded::Delta(block.delta.text.unwrap_or_default())
                }
                Ok(_) => Decoded::Ignore,
                Err(e) => Decoded::Malformed(format!("{e}: {}", chunk.data)),
            }
        }
        "message_stop" => Decoded::Done,
        "error" => {
            let message = payload
                .as_ref()
                .and_then(|v| v.pointer("/error/message"))
                .and_then(|m| m.as_str())
                .unwrap_or("An error occurred during streaming");
            Decoded::Error(message.to_string())
        }
        "message_start" | "content_block_start" | "content_block_stop" | "message_delta"
        | "ping" => Decoded::Ignore,
        "" => Decoded::Malformed(format!("untyped event: {}", chunk.data)),
        other => {
            tracing::debug!(event = other, "Ignoring unknown Anthropic event");
            Decoded::Ignore
        }
    }
}
