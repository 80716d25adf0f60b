//! Injects the board position and engine analysis into the latest user turn.

use analysis_engine::AnalysisResult;
use chess_core::{BoardPosition, Message, Role};
use thiserror::Error;

/// First line of every augmented turn
pub const POSITION_HEADER: &str = "Current position (FEN):";
const SIDE_TO_MOVE: &str = "Side to move:";
const ANALYSIS_HEADER: &str = "Engine analysis:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PromptError {
    #[error("Conversation has no user turn")]
    NoUserTurn,
}

/// Index of the most recent user turn
pub fn latest_user_turn(messages: &[Message]) -> Option<usize> {
    messages.iter().rposition(|m| m.role == Role::User)
}

/// Whether `content` already has the shape [`render`] produces: the header,
/// the side to move, a blank line, then the analysis block.
pub fn is_augmented(content: &str) -> bool {
    let mut lines = content.lines();
    lines.next().is_some_and(|l| l.starts_with(POSITION_HEADER))
        && lines.next().is_some_and(|l| l.starts_with(SIDE_TO_MOVE))
        && lines.next() == Some("")
        && lines.next() == Some(ANALYSIS_HEADER)
}

fn render(position: &BoardPosition, analysis: &AnalysisResult, question: &str) -> String {
    format!(
        "{POSITION_HEADER} {fen}\n{SIDE_TO_MOVE} {side}\n\n{ANALYSIS_HEADER}\n{analysis}\n\n{question}",
        fen = position.fen,
        side = position.side_to_move_name(),
        analysis = analysis.text().trim_end(),
    )
}

/// Rewrite the latest user turn so it opens with the position and analysis,
/// keeping the original question at the end. A turn that already carries
/// the header is left alone.
pub fn augment(
    mut messages: Vec<Message>,
    position: &BoardPosition,
    analysis: &AnalysisResult,
) -> Result<Vec<Message>, PromptError> {
    let idx = latest_user_turn(&messages).ok_or(PromptError::NoUserTurn)?;
    let turn = &mut messages[idx];

    if is_augmented(&turn.content) {
        tracing::debug!("Latest user turn already augmented");
        return Ok(messages);
    }

    turn.content = render(position, analysis, &turn.content);
    Ok(messages)
}

/// Turns to send upstream: system turns are dropped, order is kept.
pub fn provider_turns(messages: &[Message]) -> Vec<Message> {
    messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect()
}
