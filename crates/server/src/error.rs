use analysis_engine::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chess_core::FenError;
use serde_json::json;

use crate::clients::{ProviderError, RejectionKind};
use crate::prompt::PromptError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(#[from] FenError),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("No credential configured for model {0}")]
    MissingCredential(String),

    #[error(transparent)]
    Prompt(#[from] PromptError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Provider(ProviderError),

    /// Our own fault, such as a provider request we built wrong
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<ProviderError> for AppError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Rejected {
                kind: RejectionKind::MalformedRequest,
                status,
                message,
            } => AppError::Internal(format!("Provider refused our request ({status}): {message}")),
            other => AppError::Provider(other),
        }
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidPosition(_)
            | AppError::UnknownModel(_)
            | AppError::MissingCredential(_)
            | AppError::Prompt(_) => StatusCode::BAD_REQUEST,
            AppError::Engine(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Provider(ProviderError::Rejected {
                kind: RejectionKind::RateLimited,
                ..
            }) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Provider(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Engine(e) => {
                tracing::error!("Engine error: {e}");
                "The analysis engine is not available right now. Please try again.".to_string()
            }
            AppError::Provider(e) => {
                tracing::error!("Provider error: {e}");
                match e {
                    ProviderError::Rejected {
                        kind: RejectionKind::RateLimited,
                        ..
                    } => "The model is rate limited. Please wait and try again.".to_string(),
                    _ => "The model could not answer right now. Please try again.".to_string(),
                }
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {msg}");
                "Internal server error".to_string()
            }
            other => {
                tracing::debug!("Rejected request: {other}");
                other.to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
