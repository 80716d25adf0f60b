//! Analysis requests and the raw text the engine returns for them

use serde::Serialize;

/// Token that marks the end of one analysis in the engine's output
pub const SENTINEL: &str = "bestmove";

/// One analysis to run. Consumed by the session, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    /// Board position as FEN
    pub position: String,
    /// Search depth in plies, at least 1
    pub depth: u32,
}

impl AnalysisRequest {
    pub fn new(position: impl Into<String>, depth: u32) -> Self {
        Self {
            position: position.into(),
            depth: depth.max(1),
        }
    }
}

/// Engine evaluation from the side to move's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Score {
    /// Centipawns
    Cp(i32),
    /// Mate in N moves (negative = side to move gets mated)
    Mate(i32),
}

/// Everything the engine printed for one request, up to and including the
/// sentinel line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    text: String,
}

impl AnalysisResult {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Whether the sentinel line was seen
    pub fn is_complete(&self) -> bool {
        self.text.lines().any(|l| l.contains(SENTINEL))
    }

    /// Best move in UCI notation, from the sentinel line
    pub fn best_move(&self) -> Option<&str> {
        let line = self.text.lines().rev().find(|l| l.contains(SENTINEL))?;
        let mut parts = line.split_whitespace();
        parts.find(|p| *p == SENTINEL)?;
        parts.next().filter(|m| *m != "(none)")
    }

    /// Score from the deepest `info ... score` line
    pub fn score(&self) -> Option<Score> {
        self.last_info_line().and_then(|line| {
            parse_mate(line)
                .map(Score::Mate)
                .or_else(|| parse_cp(line).map(Score::Cp))
        })
    }

    /// Principal variation from the deepest `info ... pv` line
    pub fn principal_variation(&self) -> Vec<String> {
        self.last_info_line().map(parse_pv).unwrap_or_default()
    }

    fn last_info_line(&self) -> Option<&str> {
        self.text
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| l.starts_with("info") && l.contains(" score "))
    }
}

fn token_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut parts = line.split_whitespace();
    parts.find(|p| *p == key)?;
    parts.next()
}

/// Parse centipawn score from info line
fn parse_cp(line: &str) -> Option<i32> {
    token_after(line, "cp")?.parse().ok()
}

/// Parse mate score from info line
fn parse_mate(line: &str) -> Option<i32> {
    token_after(line, "mate")?.parse().ok()
}

/// Parse PV moves from info line
fn parse_pv(line: &str) -> Vec<String> {
    line.split_whitespace()
        .skip_while(|p| *p != "pv")
        .skip(1)
        .take_while(|p| !p.starts_with("bmc") && *p != "string")
        .map(String::from)
        .collect()
}
