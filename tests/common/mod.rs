//! Shared harness for the relay tests.
//!
//! Every test gets its own relay on an ephemeral port, backed by the
//! in-process fake engine and a scripted Anthropic-style upstream.

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use analysis_engine::testing::FakeEngine;
use analysis_engine::EngineSession;
use axum::{
    body::Body,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chess_core::{EventFrame, FrameDecoder};
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use server::clients::{ProviderClient, ProviderKind};
use server::config::{Config, ModelRoute};

pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Model routed to the fake upstream, with a credential configured
pub const MODEL: &str = "m1";
/// Model routed to the fake upstream, with no credential configured
pub const MODEL_WITHOUT_KEY: &str = "m2";

/// What the fake upstream does with every request
#[derive(Clone, Debug)]
pub enum Script {
    /// Stream these text deltas, then `message_stop`
    Deltas(Vec<&'static str>),
    /// Stream an `error` event before any text
    ErrorFirst(&'static str),
    /// Stream these deltas, then an `error` event
    ErrorAfter(Vec<&'static str>, &'static str),
    /// Refuse the request with this status and message
    Status(u16, &'static str),
    /// Stream one delta per interval, forever
    Endless(Duration),
}

/// Scripted provider. Records what it was sent.
pub struct FakeUpstream {
    script: Script,
    hits: AtomicUsize,
    requests: Mutex<Vec<Value>>,
    disconnected: Arc<AtomicBool>,
}

/// Flips a flag when the response body it lives in is dropped
struct DisconnectFlag(Arc<AtomicBool>);

impl Drop for DisconnectFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

fn sse_event(name: &str, data: Value) -> String {
    format!("event: {name}\ndata: {data}\n\n")
}

fn text_delta(text: &str) -> String {
    sse_event(
        "content_block_delta",
        json!({
            "type": "content_block_delta",
            "index": 0,
            "delta": {"type": "text_delta", "text": text},
        }),
    )
}

fn error_event(message: &str) -> String {
    sse_event(
        "error",
        json!({"type": "error", "error": {"type": "overloaded_error", "message": message}}),
    )
}

fn event_stream(events: Vec<String>) -> Response {
    let body = futures::stream::iter(events.into_iter().map(Ok::<_, Infallible>));
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(body),
    )
        .into_response()
}

impl FakeUpstream {
    fn new(script: Script) -> Self {
        Self {
            script,
            hits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            disconnected: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Request bodies received so far
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    /// True once an endless response has been abandoned by the relay
    pub fn disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    fn respond(&self, body: Value) -> Response {
        self.hits.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(body);

        let start = sse_event("message_start", json!({"type": "message_start"}));
        let stop = sse_event("message_stop", json!({"type": "message_stop"}));

        match &self.script {
            Script::Deltas(parts) => {
                let mut events = vec![start];
                events.extend(parts.iter().map(|p| text_delta(p)));
                events.push(stop);
                event_stream(events)
            }
            Script::ErrorFirst(message) => event_stream(vec![start, error_event(message)]),
            Script::ErrorAfter(parts, message) => {
                let mut events = vec![start];
                events.extend(parts.iter().map(|p| text_delta(p)));
                events.push(error_event(message));
                event_stream(events)
            }
            Script::Status(status, message) => (
                StatusCode::from_u16(*status).unwrap(),
                Json(json!({"type": "error", "error": {"type": "api_error", "message": message}})),
            )
                .into_response(),
            Script::Endless(interval) => {
                let interval = *interval;
                let flag = DisconnectFlag(self.disconnected.clone());
                let ticks = futures::stream::unfold(flag, move |flag| async move {
                    tokio::time::sleep(interval).await;
                    Some((Ok::<_, Infallible>(text_delta("tick ")), flag))
                });
                let body = futures::stream::once(async move { Ok::<_, Infallible>(start) }).chain(ticks);
                (
                    [(header::CONTENT_TYPE, "text/event-stream")],
                    Body::from_stream(body),
                )
                    .into_response()
            }
        }
    }

    fn router(self: Arc<Self>) -> Router {
        Router::new().route(
            "/v1/messages",
            post(move |Json(body): Json<Value>| {
                let upstream = self.clone();
                async move { upstream.respond(body) }
            }),
        )
    }
}

/// A running relay and handles on its fakes
pub struct Relay {
    pub url: String,
    pub engine: FakeEngine,
    pub upstream: Arc<FakeUpstream>,
}

impl Relay {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }
}

/// Serve a router on an ephemeral local port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("No local address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Test server failed");
    });
    format!("http://{addr}")
}

pub async fn spawn_relay(script: Script) -> Relay {
    spawn_relay_with(script, FakeEngine::new()).await
}

pub async fn spawn_relay_with(script: Script, engine: FakeEngine) -> Relay {
    let upstream = Arc::new(FakeUpstream::new(script));
    let upstream_url = serve(upstream.clone().router()).await;

    let mut config = Config::default()
        .with_model(ModelRoute::new(MODEL, ProviderKind::Anthropic, "fake-model", "M1_KEY"))
        .with_model(ModelRoute::new(
            MODEL_WITHOUT_KEY,
            ProviderKind::Anthropic,
            "fake-model",
            "M2_KEY",
        ))
        .with_credential("M1_KEY", "test-key");
    config.anthropic_base_url = upstream_url;
    config.analysis_depth = 3;
    config.provider_idle_timeout_secs = 5;

    let session = EngineSession::start(Arc::new(engine.clone()), config.session_config());
    let provider = ProviderClient::new(&config).expect("Failed to build provider client");
    let url = serve(server::app(config, session, provider)).await;

    Relay {
        url,
        engine,
        upstream,
    }
}

pub fn client() -> Client {
    Client::new()
}

/// Chat request body with a single user turn.
pub fn chat_body(question: &str, position: &str, model: &str) -> Value {
    json!({
        "messages": [{"role": "user", "content": question}],
        "position": position,
        "model": model,
    })
}

/// Read a streamed response to the end and decode its frames.
pub async fn read_frames(resp: reqwest::Response) -> Vec<EventFrame> {
    let mut decoder = FrameDecoder::new();
    let mut frames = Vec::new();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.expect("Failed to read response body");
        frames.extend(decoder.push(&chunk).into_iter().map(|f| f.expect("Bad frame")));
    }
    if let Some(last) = decoder.finish() {
        frames.push(last.expect("Bad trailing frame"));
    }
    frames
}

/// Concatenated delta text of a frame sequence
pub fn reply_text(frames: &[EventFrame]) -> String {
    frames
        .iter()
        .filter_map(|f| match f {
            EventFrame::Delta(text) => Some(text.as_str()),
            EventFrame::Done => None,
        })
        .collect()
}

pub fn done_count(frames: &[EventFrame]) -> usize {
    frames.iter().filter(|f| f.is_done()).count()
}
