//! Engine session error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Process could not be started, exited, or closed its streams
    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    #[error("Engine produced no result within {0:?}")]
    Timeout(Duration),

    /// The request queue is full
    #[error("Engine busy: analysis queue is full")]
    Busy,
}
