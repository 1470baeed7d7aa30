// Postgres-backed `GameStore`.
//
// Schema lives with the operations tooling; this module only issues the
// queries the engine needs. Every call is wrapped by the session's sync
// boundary, so errors here surface as warnings, never as game failures.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use uuid::Uuid;

use podium_common::pin::GamePin;
use podium_common::types::Question;

use super::{CreatedGame, CreatedPlayer, GameStateUpdate, GameStore, ScoredAnswer, StoredPlayer};

const DEFAULT_MIN_CONNECTIONS: u32 = 2;
const DEFAULT_MAX_CONNECTIONS: u32 = 20;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
        }
    }
}

impl PoolConfig {
    pub fn from_env() -> Self {
        let min_connections = env::var("PODIUM_DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MIN_CONNECTIONS);

        let max_connections = env::var("PODIUM_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_CONNECTIONS);

        let acquire_timeout_secs = env::var("PODIUM_DB_ACQUIRE_TIMEOUT_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS);

        Self {
            min_connections,
            max_connections,
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
        }
    }
}

pub async fn create_pg_pool(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let connect_options = database_url
        .parse::<PgConnectOptions>()
        .context("failed to parse PostgreSQL connection options")?;

    PgPoolOptions::new()
        .min_connections(config.min_connections)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .context("failed to connect to PostgreSQL")
}

pub struct PgGameStore {
    pool: PgPool,
}

impl PgGameStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn generate_token() -> String {
    rand::thread_rng().sample_iter(&Alphanumeric).take(TOKEN_LENGTH).map(char::from).collect()
}

#[derive(Debug, sqlx::FromRow)]
struct PlayerRow {
    id: Uuid,
    display_name: String,
    score: i64,
}

impl GameStore for PgGameStore {
    async fn create_game(
        &self,
        pin: &GamePin,
        questions: &[Question],
        password: Option<&str>,
    ) -> Result<CreatedGame> {
        let game_id = Uuid::new_v4();
        let moderator_token = generate_token();
        let questions_json =
            serde_json::to_string(questions).context("failed to encode questions")?;

        sqlx::query(
            "
            INSERT INTO games (id, pin, questions, password, moderator_token, status, current_question_index)
            VALUES ($1, $2, $3::jsonb, $4, $5, 'waiting', 0)
            ",
        )
        .bind(game_id)
        .bind(pin.as_str())
        .bind(&questions_json)
        .bind(password)
        .bind(&moderator_token)
        .execute(&self.pool)
        .await
        .context("failed to insert game row")?;

        Ok(CreatedGame { game_id, moderator_token })
    }

    async fn add_player(&self, game_id: Uuid, display_name: &str) -> Result<CreatedPlayer> {
        let player_id = Uuid::new_v4();
        let player_token = generate_token();

        sqlx::query(
            "
            INSERT INTO players (id, game_id, display_name, token, score)
            VALUES ($1, $2, $3, $4, 0)
            ",
        )
        .bind(player_id)
        .bind(game_id)
        .bind(display_name)
        .bind(&player_token)
        .execute(&self.pool)
        .await
        .context("failed to insert player row")?;

        Ok(CreatedPlayer { player_id, player_token })
    }

    async fn game_players(&self, game_id: Uuid) -> Result<Vec<StoredPlayer>> {
        let rows = sqlx::query_as::<_, PlayerRow>(
            "
            SELECT id, display_name, score
            FROM players
            WHERE game_id = $1
            ORDER BY score DESC
            ",
        )
        .bind(game_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load player rows")?;

        Ok(rows
            .into_iter()
            .map(|row| StoredPlayer {
                player_id: row.id,
                display_name: row.display_name,
                score: row.score,
            })
            .collect())
    }

    async fn update_player_score(&self, player_id: Uuid, score: i64) -> Result<()> {
        sqlx::query("UPDATE players SET score = $2 WHERE id = $1")
            .bind(player_id)
            .bind(score)
            .execute(&self.pool)
            .await
            .context("failed to update player score")?;
        Ok(())
    }

    async fn save_answer(&self, game_id: Uuid, answer: &ScoredAnswer) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO answers (game_id, player_id, question_index, option_index, is_correct, points, response_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (game_id, player_id, question_index) DO NOTHING
            ",
        )
        .bind(game_id)
        .bind(answer.player_id)
        .bind(answer.question_index as i32)
        .bind(answer.option_index as i32)
        .bind(answer.is_correct)
        .bind(i64::from(answer.points))
        .bind(answer.response_time_ms)
        .execute(&self.pool)
        .await
        .context("failed to insert answer row")?;
        Ok(())
    }

    async fn update_game_state(&self, game_id: Uuid, update: &GameStateUpdate) -> Result<()> {
        sqlx::query(
            "
            UPDATE games
            SET status = $2, current_question_index = $3, question_started_at = $4
            WHERE id = $1
            ",
        )
        .bind(game_id)
        .bind(update.phase.as_str())
        .bind(update.current_question_index as i32)
        .bind(update.question_started_at)
        .execute(&self.pool)
        .await
        .context("failed to update game state row")?;
        Ok(())
    }
}
