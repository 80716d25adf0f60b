//! Structural validation of FEN position strings.

use shakmaty::{fen::Fen, CastlingMode, Chess, Color, EnPassantMode, Position};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FenError {
    #[error("Position is empty")]
    Empty,

    #[error("Invalid FEN: {0}")]
    Syntax(String),

    #[error("Illegal position: {0}")]
    Illegal(String),
}

/// A position that parsed and passed legality checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardPosition {
    /// Normalized FEN (en passant square only when a capture is legal)
    pub fen: String,
    pub side_to_move: Color,
}

impl BoardPosition {
    pub fn side_to_move_name(&self) -> &'static str {
        match self.side_to_move {
            Color::White => "White",
            Color::Black => "Black",
        }
    }
}

/// Parse and validate a FEN string, returning its normalized form.
pub fn validate_fen(input: &str) -> Result<BoardPosition, FenError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(FenError::Empty);
    }

    let fen: Fen = trimmed
        .parse()
        .map_err(|e| FenError::Syntax(format!("{e}")))?;
    let pos: Chess = fen
        .into_position(CastlingMode::Standard)
        .map_err(|e| FenError::Illegal(format!("{e}")))?;

    Ok(BoardPosition {
        fen: Fen::from_position(&pos, EnPassantMode::Legal).to_string(),
        side_to_move: pos.turn(),
    })
}
