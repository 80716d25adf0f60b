use analysis_engine::EngineSession;
use axum::{Extension, Json};
use serde_json::{json, Value as JsonValue};

use crate::config::Config;

/// GET /health
pub async fn health_check(
    Extension(engine): Extension<EngineSession>,
    Extension(config): Extension<Config>,
) -> Json<JsonValue> {
    Json(json!({
        "status": "ok",
        "engine": engine.state(),
        "models": config.model_ids(),
    }))
}
