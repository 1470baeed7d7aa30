// In-memory `GameStore`: backs tests and single-process runs without a
// database. Can be flipped into a failing mode to exercise the
// swallow-and-log behavior at the sync boundary.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use uuid::Uuid;

use podium_common::pin::GamePin;
use podium_common::types::Question;

use super::{CreatedGame, CreatedPlayer, GameStateUpdate, GameStore, ScoredAnswer, StoredPlayer};

#[derive(Debug, Default)]
struct Inner {
    games: HashMap<Uuid, (GamePin, GameStateUpdate)>,
    players: HashMap<Uuid, StoredPlayer>,
    answers: Vec<(Uuid, ScoredAnswer)>,
}

#[derive(Debug, Default)]
pub struct MemoryGameStore {
    inner: Mutex<Inner>,
    fail: AtomicBool,
}

impl MemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail, simulating a database outage.
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("simulated database outage");
        }
        Ok(())
    }

    pub fn game_count(&self) -> usize {
        self.inner.lock().unwrap().games.len()
    }

    pub fn answer_count(&self) -> usize {
        self.inner.lock().unwrap().answers.len()
    }

    pub fn player_score(&self, player_id: Uuid) -> Option<i64> {
        self.inner.lock().unwrap().players.get(&player_id).map(|p| p.score)
    }

    pub fn game_state(&self, game_id: Uuid) -> Option<GameStateUpdate> {
        self.inner.lock().unwrap().games.get(&game_id).map(|(_, state)| state.clone())
    }
}

impl GameStore for MemoryGameStore {
    async fn create_game(
        &self,
        pin: &GamePin,
        _questions: &[Question],
        _password: Option<&str>,
    ) -> anyhow::Result<CreatedGame> {
        self.check()?;
        let game_id = Uuid::new_v4();
        let state = GameStateUpdate {
            phase: podium_common::types::Phase::Waiting,
            current_question_index: 0,
            question_started_at: None,
        };
        self.inner.lock().unwrap().games.insert(game_id, (pin.clone(), state));
        Ok(CreatedGame { game_id, moderator_token: format!("mod-{game_id}") })
    }

    async fn add_player(&self, _game_id: Uuid, display_name: &str) -> anyhow::Result<CreatedPlayer> {
        self.check()?;
        let player_id = Uuid::new_v4();
        self.inner.lock().unwrap().players.insert(
            player_id,
            StoredPlayer { player_id, display_name: display_name.to_string(), score: 0 },
        );
        Ok(CreatedPlayer { player_id, player_token: format!("tok-{player_id}") })
    }

    async fn game_players(&self, _game_id: Uuid) -> anyhow::Result<Vec<StoredPlayer>> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        Ok(inner.players.values().cloned().collect())
    }

    async fn update_player_score(&self, player_id: Uuid, score: i64) -> anyhow::Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        inner
            .players
            .entry(player_id)
            .or_insert_with(|| StoredPlayer {
                player_id,
                display_name: String::new(),
                score: 0,
            })
            .score = score;
        Ok(())
    }

    async fn save_answer(&self, game_id: Uuid, answer: &ScoredAnswer) -> anyhow::Result<()> {
        self.check()?;
        self.inner.lock().unwrap().answers.push((game_id, answer.clone()));
        Ok(())
    }

    async fn update_game_state(&self, game_id: Uuid, update: &GameStateUpdate) -> anyhow::Result<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        match inner.games.get_mut(&game_id) {
            Some((_, state)) => {
                *state = update.clone();
                Ok(())
            }
            None => bail!("game {game_id} not found"),
        }
    }
}
