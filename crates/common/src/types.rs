// Core domain types shared across the Podium crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pin::GamePin;

/// The session state machine value.
///
/// Transitions are strictly `Waiting → QuestionActive → Results → {Waiting |
/// Finished}`; `Finished` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Waiting,
    QuestionActive,
    Results,
    Finished,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::QuestionActive => "question_active",
            Self::Results => "results",
            Self::Finished => "finished",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// One quiz question with its answer options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    /// Index into `options` of the correct answer.
    pub correct_option: usize,
    /// Answer window in seconds; drives the speed bonus and auto-end deadline.
    pub time_limit_secs: u32,
}

/// A question shaped for broadcast to players: no correct answer included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionView {
    pub index: usize,
    pub prompt: String,
    pub options: Vec<String>,
    pub time_limit_secs: u32,
}

impl QuestionView {
    pub fn of(index: usize, question: &Question) -> Self {
        Self {
            index,
            prompt: question.prompt.clone(),
            options: question.options.clone(),
            time_limit_secs: question.time_limit_secs,
        }
    }
}

/// Public view of a player inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Uuid,
    pub display_name: String,
    pub score: u32,
    pub connected: bool,
    /// Stable join sequence number; survives reconnects.
    pub join_order: u64,
}

/// One row of the computed leaderboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    /// Dense 1-based rank.
    pub position: usize,
    pub player_id: Uuid,
    pub display_name: String,
    pub score: u32,
    pub connected: bool,
}

/// Snapshot of a session's public state, consumed by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub pin: GamePin,
    pub phase: Phase,
    pub current_question_index: usize,
    pub question_count: usize,
    pub question_started_at: Option<DateTime<Utc>>,
    pub player_count: usize,
    pub connected_count: usize,
}

/// Process-wide resource snapshot, consumed by the transport's stats read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub active_games: usize,
    pub total_players: usize,
    pub rss_mb: Option<u64>,
    /// Estimated in-memory footprint of all sessions, in bytes.
    pub estimated_session_bytes: u64,
    /// `used / max_memory_usage_mb`, in `[0, ∞)`.
    pub memory_pressure: f64,
    /// `active_games / max_active_games`, in `[0, ∞)`.
    pub session_pressure: f64,
}

/// Cumulative counters from the registry's cleanup machinery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub cleanup_runs: u64,
    pub aggressive_runs: u64,
    pub games_removed: u64,
    pub players_removed: u64,
    /// Best-effort estimate of bytes reclaimed by removals.
    pub reclaimed_bytes_estimate: u64,
}

#[cfg(test)]
mod tests {
    use super::{Phase, Question, QuestionView};

    #[test]
    fn phase_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Phase::QuestionActive).unwrap(), "\"question_active\"");
        assert_eq!(serde_json::to_string(&Phase::Waiting).unwrap(), "\"waiting\"");
    }

    #[test]
    fn only_finished_is_terminal() {
        assert!(Phase::Finished.is_terminal());
        assert!(!Phase::Waiting.is_terminal());
        assert!(!Phase::QuestionActive.is_terminal());
        assert!(!Phase::Results.is_terminal());
    }

    #[test]
    fn question_view_strips_the_correct_answer() {
        let question = Question {
            prompt: "Largest planet?".into(),
            options: vec!["Mars".into(), "Jupiter".into()],
            correct_option: 1,
            time_limit_secs: 30,
        };
        let view = QuestionView::of(3, &question);
        assert_eq!(view.index, 3);
        assert_eq!(view.options.len(), 2);
        let raw = serde_json::to_string(&view).unwrap();
        assert!(!raw.contains("correct_option"));
    }
}
