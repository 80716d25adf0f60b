//! Client side of the chat relay: sends a turn, then rebuilds the
//! assistant's reply frame by frame as it streams in.

pub mod error;
pub mod session;

pub use error::ClientError;
pub use session::{CancelHandle, ChatClient, ChatSession, TurnOutcome, FALLBACK_MESSAGE};
