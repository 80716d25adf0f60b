//! OpenAI-compatible chat completion streaming

use chess_core::Message;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Decoded, RawChunk};

#[derive(Serialize)]
struct CompletionRequest<'a> {
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
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

pub fn build_request(
    client: &Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[Message],
    max_tokens: u32,
) -> RequestBuilder {
    let body = CompletionRequest {
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
        .post(format!("{base_url}/v1/chat/completions"))
        .bearer_auth(api_key)
        .json(&body)
}

pub fn decode(chunk: &RawChunk) -> Decoded {
    let data = chunk.data.trim();
    if data == "[DONE]" {
        return Decoded::Done;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return Decoded::Malformed(format!("{e}: {data}")),
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .or_else(|| error.as_str())
            .unwrap_or("An error occurred during streaming");
        return Decoded::Error(message.to_string());
    }

    match serde_json::from_value::<CompletionChunk>(value) {
        Ok(parsed) => {
            let text: String = parsed
                .choices
                .into_iter()
                .filter_map(|c| c.delta.and_then(|d| d.content))
                .collect();
            if text.is_empty() {
                Decoded::Ignore
            } else {
                Decoded::Delta(text)
            }
        }
        Err(e) => Decoded::Malformed(format!("{e}: {data}")),
    }
}
