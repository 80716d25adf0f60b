//! Types shared by the relay server and its clients: board positions,
//! chat turns and the streamed event-frame protocol.

pub mod chat;
pub mod fen;
pub mod frame;

pub use chat::{ChatRequest, Message, Role};
pub use fen::{validate_fen, BoardPosition, FenError};
pub use frame::{EventFrame, FrameDecoder, FrameError, DONE_MARKER};
