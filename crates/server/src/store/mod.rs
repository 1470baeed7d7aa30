// Best-effort persistence boundary.
//
// Sessions operate purely in memory; the store is called through a single
// `sync_to_database` entry point per session, and any failure there is
// logged and swallowed. Trait-based for testing, with a Postgres
// implementation for production.

pub mod memory;
pub mod postgres;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use podium_common::pin::GamePin;
use podium_common::types::{Phase, Question};

/// Row handed back when a game is first persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedGame {
    pub game_id: Uuid,
    pub moderator_token: String,
}

/// Row handed back when a player is first persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPlayer {
    pub player_id: Uuid,
    pub player_token: String,
}

/// A player row as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPlayer {
    pub player_id: Uuid,
    pub display_name: String,
    pub score: i64,
}

/// Game-state fields mirrored to the database on every sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameStateUpdate {
    pub phase: Phase,
    pub current_question_index: usize,
    pub question_started_at: Option<DateTime<Utc>>,
}

/// One scored answer, flushed when a question ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredAnswer {
    pub player_id: Uuid,
    pub question_index: usize,
    pub option_index: usize,
    pub is_correct: bool,
    pub points: u32,
    pub response_time_ms: i64,
}

/// Abstraction over the database collaborator. Trait-based for testing.
///
/// All methods return `Send` futures so syncs can run on a multi-threaded
/// tokio runtime.
pub trait GameStore: Send + Sync {
    fn create_game(
        &self,
        pin: &GamePin,
        questions: &[Question],
        password: Option<&str>,
    ) -> impl std::future::Future<Output = anyhow::Result<CreatedGame>> + Send;

    fn add_player(
        &self,
        game_id: Uuid,
        display_name: &str,
    ) -> impl std::future::Future<Output = anyhow::Result<CreatedPlayer>> + Send;

    fn game_players(
        &self,
        game_id: Uuid,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<StoredPlayer>>> + Send;

    fn update_player_score(
        &self,
        player_id: Uuid,
        score: i64,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    fn save_answer(
        &self,
        game_id: Uuid,
        answer: &ScoredAnswer,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;

    fn update_game_state(
        &self,
        game_id: Uuid,
        update: &GameStateUpdate,
    ) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}
