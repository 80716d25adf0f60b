//! Engine session: one long-lived UCI engine process behind a FIFO queue.
//!
//! Every analysis goes through [`EngineSession::analyze`]. The process and
//! its stdin/stdout are owned by a single worker task, so two analyses can
//! never interleave on the engine's streams.

pub mod analysis;
pub mod error;
pub mod launcher;
pub mod session;
mod uci;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use analysis::{AnalysisRequest, AnalysisResult, Score, SENTINEL};
pub use error::EngineError;
pub use launcher::{EngineIo, EngineLauncher, StockfishLauncher};
pub use session::{EngineSession, EngineState, SessionConfig};
