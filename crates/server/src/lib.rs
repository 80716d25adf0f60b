pub mod clients;
pub mod config;
pub mod error;
pub mod prompt;
pub mod routes;
pub mod transcoder;

use analysis_engine::EngineSession;
use axum::{
    routing::{get, post},
    Extension, Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::clients::ProviderClient;
use crate::config::Config;

/// Build the router with its shared state
pub fn app(config: Config, engine: EngineSession, provider: ProviderClient) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/chat", post(routes::chat::chat))
        .route("/api/analysis", get(routes::analysis::analyze_position))
        .layer(Extension(config))
        .layer(Extension(engine))
        .layer(Extension(provider))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
