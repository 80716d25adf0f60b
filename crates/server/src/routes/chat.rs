//! POST /api/chat: engine-augmented chat, streamed as event frames.
//!
//! Order of work for one request:
//! 1. validate the position and resolve the model credential (cheap, no I/O)
//! 2. run the engine analysis (queued behind other requests)
//! 3. augment the latest user turn and drop system turns
//! 4. open the provider stream and transcode it to the client

use std::convert::Infallible;

use analysis_engine::EngineSession;
use axum::{
    body::Body,
    extract::rejection::JsonRejection,
    http::header,
    response::{IntoResponse, Response},
    Extension, Json,
};
use chess_core::{validate_fen, ChatRequest};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clients::{ProviderClient, ProviderRequest};
use crate::config::Config;
use crate::error::AppError;
use crate::prompt::{self, PromptError};
use crate::transcoder::Transcoder;

pub async fn chat(
    Extension(config): Extension<Config>,
    Extension(engine): Extension<EngineSession>,
    Extension(provider): Extension<ProviderClient>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = body.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let position = validate_fen(&req.position)?;
    let model = config.resolve_model(&req.model)?;
    if prompt::latest_user_turn(&req.messages).is_none() {
        return Err(PromptError::NoUserTurn.into());
    }

    let analysis = engine.analyze(&position.fen, config.analysis_depth).await?;

    let messages = prompt::augment(req.messages, &position, &analysis)?;
    let turns = prompt::provider_turns(&messages);

    info!(
        model = %model.route.id,
        turns = turns.len(),
        best_move = analysis.best_move().unwrap_or("-"),
        "Relaying chat turn"
    );

    let cancel = CancellationToken::new();
    let chunks = provider
        .open_stream(
            ProviderRequest {
                route: &model.route,
                credential: &model.credential,
                messages: &turns,
            },
            cancel.clone(),
        )
        .await?;

    // Client disconnect drops the body stream, which cancels the upstream call
    let mut transcoder =
        Transcoder::new(chunks, model.route.provider).with_cancel_guard(cancel.drop_guard());
    transcoder.prime().await?;

    let frames = transcoder
        .into_stream()
        .map(|frame| Ok::<_, Infallible>(frame.encode()));

    Ok((
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response())
}
