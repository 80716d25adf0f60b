//! End-to-end tests for POST /api/chat.
//!
//! Each test runs the relay in-process against the fake engine and a
//! scripted upstream, so nothing external needs to be running.

mod common;

use std::time::Duration;

use analysis_engine::testing::{FakeEngine, FakeEvent};
use chess_core::EventFrame;
use common::{Relay, Script, MODEL, MODEL_WITHOUT_KEY, START_FEN};
use serde_json::{json, Value};

const AFTER_E4_FEN: &str = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1";
const ROOK_ENDGAME_FEN: &str = "4k3/8/8/8/8/8/8/4K2R w K - 0 1";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn post_chat(relay: &Relay, body: &Value) -> reqwest::Response {
    common::client()
        .post(relay.url("/api/chat"))
        .json(body)
        .send()
        .await
        .expect("Failed to send chat request")
}

async fn error_message(resp: reqwest::Response) -> String {
    let body: Value = resp.json().await.expect("Error body is not JSON");
    body["error"]
        .as_str()
        .expect("Error body has no message")
        .to_string()
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streams_reply_and_terminates_once() {
    let relay = common::spawn_relay(Script::Deltas(vec!["The ", "best ", "move is e4."])).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let frames = common::read_frames(resp).await;
    assert_eq!(
        frames,
        vec![
            EventFrame::delta("The "),
            EventFrame::delta("best "),
            EventFrame::delta("move is e4."),
            EventFrame::Done,
        ]
    );
    assert_eq!(common::reply_text(&frames), "The best move is e4.");
    assert_eq!(relay.engine.searches(), 1);
    assert_eq!(relay.upstream.hits(), 1);
}

#[tokio::test]
async fn upstream_sees_augmented_question_without_system_turns() {
    let relay = common::spawn_relay(Script::Deltas(vec!["ok"])).await;

    let body = json!({
        "messages": [
            {"role": "system", "content": "You are a chess coach."},
            {"role": "user", "content": "Is castling possible?"},
            {"role": "assistant", "content": "Let me look."},
            {"role": "user", "content": "What's best?"},
        ],
        "position": START_FEN,
        "model": MODEL,
    });
    let frames = common::read_frames(post_chat(&relay, &body).await).await;
    assert_eq!(common::done_count(&frames), 1);

    let requests = relay.upstream.requests();
    let turns = requests[0]["messages"].as_array().unwrap();
    assert_eq!(turns.len(), 3);
    assert!(turns.iter().all(|t| t["role"] != "system"));

    // Only the latest user turn carries the position and analysis
    assert_eq!(turns[0]["content"], "Is castling possible?");
    let last = turns[2]["content"].as_str().unwrap();
    assert!(last.contains(START_FEN));
    assert!(last.contains("e2e4"));
    assert!(last.ends_with("What's best?"));
}

#[tokio::test]
async fn error_mid_stream_keeps_partial_output() {
    let relay =
        common::spawn_relay(Script::ErrorAfter(vec!["The best ", "move"], "Overloaded")).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 200);

    let frames = common::read_frames(resp).await;
    assert_eq!(common::reply_text(&frames), "The best move");
    assert_eq!(common::done_count(&frames), 1);
    assert_eq!(frames.last(), Some(&EventFrame::Done));
}

#[tokio::test]
async fn concurrent_requests_share_the_engine_in_turn() {
    let relay = common::spawn_relay_with(
        Script::Deltas(vec!["fine"]),
        FakeEngine::new().with_line_delay(Duration::from_millis(5)),
    )
    .await;

    let bodies: Vec<Value> = [START_FEN, AFTER_E4_FEN, ROOK_ENDGAME_FEN]
        .iter()
        .map(|fen| common::chat_body("What's best?", fen, MODEL))
        .collect();
    let responses =
        futures::future::join_all(bodies.iter().map(|body| post_chat(&relay, body))).await;

    for resp in responses {
        assert_eq!(resp.status(), 200);
        let frames = common::read_frames(resp).await;
        assert_eq!(common::reply_text(&frames), "fine");
    }

    // Each search was written only after the previous one's sentinel
    assert_eq!(relay.engine.searches(), 3);
    assert!(!relay.engine.interleaved_searches());
    let finished = relay
        .engine
        .events()
        .into_iter()
        .filter(|e| matches!(e, FakeEvent::BestMove(_)))
        .count();
    assert_eq!(finished, 3);
}

#[tokio::test]
async fn client_disconnect_cancels_upstream() {
    let relay = common::spawn_relay(Script::Endless(Duration::from_millis(20))).await;

    let resp = post_chat(&relay, &common::chat_body("Keep talking", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 200);
    let mut body = resp.bytes_stream();
    let first = futures::StreamExt::next(&mut body).await;
    assert!(matches!(first, Some(Ok(_))));
    drop(body);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !relay.upstream.disconnected() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Upstream call outlived the client"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_position_is_rejected_before_any_work() {
    let relay = common::spawn_relay(Script::Deltas(vec!["unused"])).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", "not a fen", MODEL)).await;
    assert_eq!(resp.status(), 400);
    assert!(!error_message(resp).await.is_empty());
    assert_eq!(relay.engine.launches(), 0);
    assert_eq!(relay.upstream.hits(), 0);
}

#[tokio::test]
async fn missing_credential_is_rejected_before_analysis() {
    let relay = common::spawn_relay(Script::Deltas(vec!["unused"])).await;

    let resp = post_chat(
        &relay,
        &common::chat_body("What's best?", START_FEN, MODEL_WITHOUT_KEY),
    )
    .await;
    assert_eq!(resp.status(), 400);
    assert!(error_message(resp).await.contains(MODEL_WITHOUT_KEY));
    assert_eq!(relay.engine.searches(), 0);
    assert_eq!(relay.upstream.hits(), 0);
}

#[tokio::test]
async fn unknown_model_is_rejected() {
    let relay = common::spawn_relay(Script::Deltas(vec!["unused"])).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, "m9")).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(relay.upstream.hits(), 0);
}

#[tokio::test]
async fn conversation_without_user_turn_is_rejected() {
    let relay = common::spawn_relay(Script::Deltas(vec!["unused"])).await;

    let body = json!({
        "messages": [{"role": "assistant", "content": "Hello"}],
        "position": START_FEN,
        "model": MODEL,
    });
    let resp = post_chat(&relay, &body).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(relay.engine.searches(), 0);
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let relay = common::spawn_relay(Script::Deltas(vec!["unused"])).await;

    let resp = post_chat(&relay, &json!({"position": START_FEN})).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(relay.upstream.hits(), 0);
}

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provider_error_before_output_is_an_error_response() {
    let relay = common::spawn_relay(Script::ErrorFirst("Overloaded")).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 502);
    assert!(!error_message(resp).await.is_empty());
}

#[tokio::test]
async fn provider_rate_limit_maps_to_429() {
    let relay = common::spawn_relay(Script::Status(429, "Too many requests")).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 429);
    assert_eq!(relay.engine.searches(), 1);
}

#[tokio::test]
async fn rejected_credential_maps_to_502() {
    let relay = common::spawn_relay(Script::Status(401, "invalid x-api-key")).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 502);
    // The upstream message is not echoed to the client
    assert!(!error_message(resp).await.contains("x-api-key"));
}

#[tokio::test]
async fn malformed_provider_request_is_internal_error() {
    let relay = common::spawn_relay(Script::Status(400, "messages: roles must alternate")).await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 500);
    assert!(!error_message(resp).await.contains("alternate"));
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_unavailable_maps_to_503() {
    let relay = common::spawn_relay_with(
        Script::Deltas(vec!["unused"]),
        FakeEngine::new().fail_launches(1),
    )
    .await;

    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 503);
    assert_eq!(relay.upstream.hits(), 0);

    // The next request launches the engine again
    let resp = post_chat(&relay, &common::chat_body("What's best?", START_FEN, MODEL)).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(relay.engine.launches(), 2);
}
