use analysis_engine::{EngineSession, Score};
use axum::{extract::Query, Extension, Json};
use chess_core::validate_fen;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AppError;

const MAX_DEPTH: u32 = 30;

#[derive(Deserialize)]
pub struct AnalysisQuery {
    pub fen: String,
    pub depth: Option<u32>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub fen: String,
    pub depth: u32,
    pub best_move: Option<String>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

/// GET /api/analysis?fen=...&depth=...
pub async fn analyze_position(
    Extension(engine): Extension<EngineSession>,
    Extension(config): Extension<Config>,
    Query(q): Query<AnalysisQuery>,
) -> Result<Json<AnalysisResponse>, AppError> {
    let position = validate_fen(&q.fen)?;
    let depth = q.depth.unwrap_or(config.analysis_depth).clamp(1, MAX_DEPTH);

    let result = engine.analyze(&position.fen, depth).await?;

    Ok(Json(AnalysisResponse {
        best_move: result.best_move().map(String::from),
        score: result.score(),
        pv: result.principal_variation(),
        fen: position.fen,
        depth,
    }))
}
