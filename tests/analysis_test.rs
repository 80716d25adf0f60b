//! Tests for GET /health and GET /api/analysis.

mod common;

use common::{Script, MODEL, START_FEN};
use serde_json::Value;

async fn get_json(url: &str) -> (u16, Value) {
    let resp = common::client()
        .get(url)
        .send()
        .await
        .expect("Failed to send request");
    let status = resp.status().as_u16();
    let body = resp.json().await.expect("Response is not JSON");
    (status, body)
}

#[tokio::test]
async fn health_reports_engine_state_and_models() {
    let relay = common::spawn_relay(Script::Deltas(vec![])).await;

    let (status, body) = get_json(&relay.url("/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["engine"], "idle");
    let models: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m.as_str())
        .collect();
    assert!(models.contains(&MODEL));
    assert!(models.contains(&"claude-sonnet"));
}

#[tokio::test]
async fn analysis_returns_best_move_and_line() {
    let relay = common::spawn_relay(Script::Deltas(vec![])).await;

    let url = reqwest::Url::parse_with_params(
        &relay.url("/api/analysis"),
        &[("fen", START_FEN), ("depth", "4")],
    )
    .unwrap();
    let (status, body) = get_json(url.as_str()).await;
    assert_eq!(status, 200);
    assert_eq!(body["fen"], START_FEN);
    assert_eq!(body["depth"], 4);
    assert_eq!(body["bestMove"], "e2e4");
    assert_eq!(body["pv"][0], "e2e4");
    assert_eq!(relay.engine.searches(), 1);
    assert_eq!(relay.upstream.hits(), 0);
}

#[tokio::test]
async fn analysis_depth_is_clamped() {
    let relay = common::spawn_relay(Script::Deltas(vec![])).await;

    let url = reqwest::Url::parse_with_params(
        &relay.url("/api/analysis"),
        &[("fen", START_FEN), ("depth", "0")],
    )
    .unwrap();
    let (status, body) = get_json(url.as_str()).await;
    assert_eq!(status, 200);
    assert_eq!(body["depth"], 1);
}

#[tokio::test]
async fn analysis_rejects_invalid_position() {
    let relay = common::spawn_relay(Script::Deltas(vec![])).await;

    let url = reqwest::Url::parse_with_params(
        &relay.url("/api/analysis"),
        &[("fen", "8/8/8/8/8/8/8/8 w - - 0 1")],
    )
    .unwrap();
    let (status, body) = get_json(url.as_str()).await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().is_some());
    assert_eq!(relay.engine.launches(), 0);
}
