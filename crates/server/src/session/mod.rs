// One quiz's authoritative state machine.
//
// All mutation happens through method calls on a single session; the
// registry wraps each session in its own mutex, so nothing interleaves
// mid-method. Time is always passed in explicitly so tests never sleep.
//
// Phase machine: Waiting → QuestionActive → Results → {Waiting | Finished}.
// Stale timer callbacks re-check the phase and no-op, so a late auto-end
// racing a manual end is safe without cancelling anything.

pub mod ledger;
pub mod scoring;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use podium_common::error::SessionError;
use podium_common::pin::GamePin;
use podium_common::types::{
    LeaderboardEntry, Phase, PlayerSnapshot, Question, QuestionView, SessionState,
};

use crate::config::SessionConfig;
use crate::events::{SessionEvent, SessionObserver};
use crate::store::{GameStateUpdate, GameStore, ScoredAnswer};

use ledger::{AnswerLedger, AnswerRecord};

/// Answer timestamps are rounded down to this interval to dampen jitter and
/// avoid exploitable sub-millisecond races.
const ANSWER_BUCKET_MS: i64 = 50;

/// Rough per-record footprints for the memory estimate.
const PLAYER_RECORD_BYTES: u64 = 256;
const ANSWER_RECORD_BYTES: u64 = 64;
const SESSION_BASE_BYTES: u64 = 2048;

/// A player known to the session. Transport identifiers live in a side map
/// on the session, never in here, so they can be invalidated independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRecord {
    pub id: Uuid,
    pub display_name: String,
    pub score: u32,
    pub connected: bool,
    /// Stable join sequence number; never changes across reconnects.
    pub join_order: u64,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl PlayerRecord {
    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            display_name: self.display_name.clone(),
            score: self.score,
            connected: self.connected,
            join_order: self.join_order,
        }
    }
}

/// Outcome of a successful `add_player`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    pub player: PlayerSnapshot,
    pub reconnected: bool,
}

/// Submission and lifecycle counters for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    pub joins: u64,
    pub reconnects: u64,
    pub answers_accepted: u64,
    pub answers_rejected: u64,
    pub players_expired: u64,
}

#[derive(Debug, Clone)]
struct CachedValue<T> {
    value: T,
    computed_at: DateTime<Utc>,
}

pub struct GameSession {
    pin: GamePin,
    questions: Vec<Question>,
    phase: Phase,
    current_question_index: usize,
    question_started_at: Option<DateTime<Utc>>,
    players: HashMap<Uuid, PlayerRecord>,
    /// Transport connection IDs, keyed by player. Side map by design.
    transport_ids: HashMap<Uuid, String>,
    /// Player auth tokens handed out by the persistence collaborator.
    player_tokens: HashMap<Uuid, String>,
    ledger: AnswerLedger,
    leaderboard_cache: Option<CachedValue<Vec<LeaderboardEntry>>>,
    connected_cache: Option<CachedValue<usize>>,
    next_join_order: u64,
    created_at: DateTime<Utc>,
    last_sync: DateTime<Utc>,
    last_cleanup: Option<DateTime<Utc>>,
    counters: SessionCounters,
    config: SessionConfig,
    observer: Arc<dyn SessionObserver>,
    /// Set once the persistence collaborator has acknowledged the game.
    db_game_id: Option<Uuid>,
    moderator_token: Option<String>,
    /// Scored answers waiting to be flushed by the next database sync.
    pending_answers: Vec<ScoredAnswer>,
}

impl GameSession {
    pub fn new(
        pin: GamePin,
        questions: Vec<Question>,
        config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
        now: DateTime<Utc>,
    ) -> Self {
        let ledger = AnswerLedger::new(config.max_answers_buffer);
        Self {
            pin,
            questions,
            phase: Phase::Waiting,
            current_question_index: 0,
            question_started_at: None,
            players: HashMap::new(),
            transport_ids: HashMap::new(),
            player_tokens: HashMap::new(),
            ledger,
            leaderboard_cache: None,
            connected_cache: None,
            next_join_order: 0,
            created_at: now,
            last_sync: now,
            last_cleanup: None,
            counters: SessionCounters::default(),
            config,
            observer,
            db_game_id: None,
            moderator_token: None,
            pending_answers: Vec::new(),
        }
    }

    pub fn pin(&self) -> &GamePin {
        &self.pin
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    // ── Players ─────────────────────────────────────────────────────

    /// Add a player, or merge a reconnection of a known one.
    ///
    /// Reconnections never fail on capacity; brand-new players are rejected
    /// with `CapacityExceeded` once the session is full.
    pub fn add_player(
        &mut self,
        player_id: Uuid,
        display_name: &str,
        transport_id: Option<&str>,
        token: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<JoinOutcome, SessionError> {
        if let Some(existing) = self.players.get_mut(&player_id) {
            existing.connected = true;
            existing.last_seen = now;
            if !display_name.is_empty() {
                existing.display_name = display_name.to_string();
            }
            let snapshot = existing.snapshot();
            if let Some(tid) = transport_id {
                self.transport_ids.insert(player_id, tid.to_string());
            }
            if let Some(token) = token {
                self.player_tokens.insert(player_id, token.to_string());
            }
            self.leaderboard_cache = None;
            self.connected_cache = None;
            self.counters.reconnects += 1;
            debug!(pin = %self.pin, %player_id, "player reconnected");
            self.observer.on_event(
                &self.pin,
                &SessionEvent::PlayerJoined { player: snapshot.clone(), reconnected: true },
            );
            return Ok(JoinOutcome { player: snapshot, reconnected: true });
        }

        if self.players.len() >= self.config.max_players {
            return Err(SessionError::CapacityExceeded {
                pin: self.pin.clone(),
                max_players: self.config.max_players,
            });
        }

        let join_order = self.next_join_order;
        self.next_join_order += 1;
        let record = PlayerRecord {
            id: player_id,
            display_name: display_name.to_string(),
            score: 0,
            connected: true,
            join_order,
            joined_at: now,
            last_seen: now,
        };
        let snapshot = record.snapshot();
        self.players.insert(player_id, record);
        if let Some(tid) = transport_id {
            self.transport_ids.insert(player_id, tid.to_string());
        }
        if let Some(token) = token {
            self.player_tokens.insert(player_id, token.to_string());
        }
        self.leaderboard_cache = None;
        self.connected_cache = None;
        self.counters.joins += 1;
        debug!(pin = %self.pin, %player_id, join_order, "player joined");
        self.observer.on_event(
            &self.pin,
            &SessionEvent::PlayerJoined { player: snapshot.clone(), reconnected: false },
        );
        Ok(JoinOutcome { player: snapshot, reconnected: false })
    }

    /// Remove a player. `permanent = false` soft-deletes (marks disconnected,
    /// keeps score and history, drops the transport mapping); `permanent =
    /// true` deletes the record and purges their ledger entries. Removing an
    /// unknown id is a no-op.
    pub fn remove_player(&mut self, player_id: Uuid, permanent: bool, now: DateTime<Utc>) -> bool {
        if permanent {
            if self.players.remove(&player_id).is_none() {
                return false;
            }
            self.transport_ids.remove(&player_id);
            self.player_tokens.remove(&player_id);
            self.ledger.purge_player(player_id);
            self.leaderboard_cache = None;
            self.connected_cache = None;
            debug!(pin = %self.pin, %player_id, "player removed permanently");
            self.observer
                .on_event(&self.pin, &SessionEvent::PlayerLeft { player_id, permanent: true });
            true
        } else {
            let Some(record) = self.players.get_mut(&player_id) else {
                return false;
            };
            record.connected = false;
            record.last_seen = now;
            self.transport_ids.remove(&player_id);
            self.leaderboard_cache = None;
            self.connected_cache = None;
            debug!(pin = %self.pin, %player_id, "player disconnected");
            self.observer
                .on_event(&self.pin, &SessionEvent::PlayerLeft { player_id, permanent: false });
            true
        }
    }

    pub fn player(&self, player_id: Uuid) -> Option<&PlayerRecord> {
        self.players.get(&player_id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn transport_id(&self, player_id: Uuid) -> Option<&str> {
        self.transport_ids.get(&player_id).map(String::as_str)
    }

    /// Token handed to the moderator once the first database sync creates
    /// the game row; `None` until then.
    pub fn moderator_token(&self) -> Option<&str> {
        self.moderator_token.as_deref()
    }

    /// Uncached connected count; the registry's eviction checks must not
    /// read through a possibly stale cache.
    pub fn connected_players(&self) -> usize {
        self.players.values().filter(|p| p.connected).count()
    }

    /// Cached count of connected players.
    pub fn connected_count(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.config.leaderboard_cache_ttl();
        if let Some(cached) = &self.connected_cache {
            if now - cached.computed_at <= ttl {
                return cached.value;
            }
        }
        let value = self.players.values().filter(|p| p.connected).count();
        self.connected_cache = Some(CachedValue { value, computed_at: now });
        value
    }

    // ── Question flow ───────────────────────────────────────────────

    /// Open the current question for answers. No-op unless `Waiting`.
    pub fn start_question(&mut self, now: DateTime<Utc>) -> bool {
        if self.phase != Phase::Waiting || self.current_question_index >= self.questions.len() {
            return false;
        }
        self.phase = Phase::QuestionActive;
        self.question_started_at = Some(now);
        let deadline = self.question_deadline();
        info!(pin = %self.pin, index = self.current_question_index, "question started");
        self.observer.on_event(
            &self.pin,
            &SessionEvent::QuestionStarted { index: self.current_question_index, deadline },
        );
        true
    }

    /// When an auto-end timer should fire for the active question.
    pub fn question_deadline(&self) -> Option<DateTime<Utc>> {
        let started = self.question_started_at?;
        let question = self.questions.get(self.current_question_index)?;
        Some(started + Duration::seconds(i64::from(question.time_limit_secs)))
    }

    /// Record an answer for the active question.
    ///
    /// Returns `None` (deliberately not an error) when the player is
    /// unknown, no question is active, or the player already answered.
    /// `latency_ms` comes from out-of-band ping/pong samples; half of it is
    /// subtracted to approximate client-side send time, then the result is
    /// bucketed to 50 ms.
    pub fn submit_answer(
        &mut self,
        player_id: Uuid,
        option_index: usize,
        latency_ms: Option<u32>,
        now: DateTime<Utc>,
    ) -> Option<AnswerRecord> {
        if self.phase != Phase::QuestionActive {
            self.counters.answers_rejected += 1;
            return None;
        }
        let Some(started_at) = self.question_started_at else {
            self.counters.answers_rejected += 1;
            return None;
        };
        if !self.players.contains_key(&player_id) || self.ledger.has_answered(player_id) {
            self.counters.answers_rejected += 1;
            return None;
        }

        let latency = i64::from(latency_ms.unwrap_or(0));
        let compensated = now - Duration::milliseconds(latency / 2);
        let bucketed_ms = compensated.timestamp_millis().div_euclid(ANSWER_BUCKET_MS) * ANSWER_BUCKET_MS;
        let bucketed_at = DateTime::from_timestamp_millis(bucketed_ms).unwrap_or(compensated);
        let response_time_ms = bucketed_ms - started_at.timestamp_millis();

        let record = AnswerRecord { player_id, option_index, bucketed_at, response_time_ms };
        self.ledger.push(record.clone());
        if let Some(player) = self.players.get_mut(&player_id) {
            player.last_seen = now;
        }
        self.counters.answers_accepted += 1;
        Some(record)
    }

    /// Close the active question and score its ledger. No-op unless
    /// `QuestionActive`, so a late timer racing a manual end is harmless.
    pub fn end_question(&mut self, _now: DateTime<Utc>) -> bool {
        if self.phase != Phase::QuestionActive {
            return false;
        }
        let index = self.current_question_index;
        let Some(question) = self.questions.get(index) else {
            return false;
        };

        let answers = self.ledger.len();
        for record in self.ledger.iter() {
            let is_correct = record.option_index == question.correct_option;
            let points =
                scoring::calculate_score(record.response_time_ms, is_correct, question.time_limit_secs);
            if let Some(player) = self.players.get_mut(&record.player_id) {
                player.score += points;
            }
            self.pending_answers.push(ScoredAnswer {
                player_id: record.player_id,
                question_index: index,
                option_index: record.option_index,
                is_correct,
                points,
                response_time_ms: record.response_time_ms,
            });
        }

        self.phase = Phase::Results;
        self.question_started_at = None;
        self.leaderboard_cache = None;
        info!(pin = %self.pin, index, answers, "question ended");
        self.observer.on_event(&self.pin, &SessionEvent::QuestionEnded { index, answers });
        true
    }

    /// Advance past the current question. Clears the ledger and start time.
    /// Returns `false` (and flips to `Finished`) past the last question.
    pub fn next_question(&mut self, _now: DateTime<Utc>) -> bool {
        if self.phase == Phase::Finished {
            return false;
        }
        self.current_question_index += 1;
        self.ledger.clear();
        self.question_started_at = None;
        // Duplicate detection scans the whole ledger, which is only sound
        // because the ledger is emptied on every transition.
        debug_assert!(self.ledger.is_empty());

        if self.current_question_index >= self.questions.len() {
            self.phase = Phase::Finished;
            info!(pin = %self.pin, "game finished");
            self.observer.on_event(&self.pin, &SessionEvent::GameFinished);
            false
        } else {
            self.phase = Phase::Waiting;
            self.leaderboard_cache = None;
            self.connected_cache = None;
            true
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Ranked standings, score descending, dense 1-based positions.
    /// Disconnected players who scored stay ranked. Cached for the
    /// configured TTL unless `force` is set.
    pub fn get_leaderboard(&mut self, force: bool, now: DateTime<Utc>) -> Vec<LeaderboardEntry> {
        let ttl = self.config.leaderboard_cache_ttl();
        if !force {
            if let Some(cached) = &self.leaderboard_cache {
                if now - cached.computed_at <= ttl {
                    return cached.value.clone();
                }
            }
        }

        let mut records: Vec<&PlayerRecord> = self.players.values().collect();
        records.sort_by(|a, b| b.score.cmp(&a.score).then(a.join_order.cmp(&b.join_order)));
        let entries: Vec<LeaderboardEntry> = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| LeaderboardEntry {
                position: i + 1,
                player_id: record.id,
                display_name: record.display_name.clone(),
                score: record.score,
                connected: record.connected,
            })
            .collect();
        self.leaderboard_cache =
            Some(CachedValue { value: entries.clone(), computed_at: now });
        entries
    }

    pub fn get_state(&mut self, now: DateTime<Utc>) -> SessionState {
        let connected_count = self.connected_count(now);
        SessionState {
            pin: self.pin.clone(),
            phase: self.phase,
            current_question_index: self.current_question_index,
            question_count: self.questions.len(),
            question_started_at: self.question_started_at,
            player_count: self.players.len(),
            connected_count,
        }
    }

    /// The active question shaped for players (no correct answer).
    pub fn current_question(&self) -> Option<QuestionView> {
        let question = self.questions.get(self.current_question_index)?;
        Some(QuestionView::of(self.current_question_index, question))
    }

    pub fn ledger(&self) -> &AnswerLedger {
        &self.ledger
    }

    // ── Lifecycle / resource management ─────────────────────────────

    /// Latest activity seen on this session: database sync or any player.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.players
            .values()
            .map(|p| p.last_seen)
            .fold(self.last_sync, |acc, seen| acc.max(seen))
    }

    /// Rate-limited cleanup pass: hard-remove disconnected players idle past
    /// the TTL and purge their side-map entries. Returns players removed.
    pub fn perform_memory_cleanup(&mut self, now: DateTime<Utc>) -> usize {
        if let Some(last) = self.last_cleanup {
            if now - last < self.config.cleanup_interval() {
                return 0;
            }
        }
        self.last_cleanup = Some(now);

        let ttl = self.config.disconnected_player_ttl();
        let expired: Vec<Uuid> = self
            .players
            .values()
            .filter(|p| !p.connected && now - p.last_seen > ttl)
            .map(|p| p.id)
            .collect();
        for player_id in &expired {
            self.players.remove(player_id);
            self.transport_ids.remove(player_id);
            self.player_tokens.remove(player_id);
            self.ledger.purge_player(*player_id);
        }
        if !expired.is_empty() {
            self.leaderboard_cache = None;
            self.connected_cache = None;
            self.counters.players_expired += expired.len() as u64;
            debug!(pin = %self.pin, removed = expired.len(), "expired disconnected players");
        }
        expired.len()
    }

    /// Rough in-memory footprint, used for pressure accounting.
    pub fn memory_estimate(&self) -> u64 {
        SESSION_BASE_BYTES
            + self.players.len() as u64 * PLAYER_RECORD_BYTES
            + self.ledger.len() as u64 * ANSWER_RECORD_BYTES
    }

    /// Shutdown hook: clears every internal map. Infallible by contract;
    /// the registry calls this on its single removal path.
    pub fn release(&mut self) {
        self.players.clear();
        self.transport_ids.clear();
        self.player_tokens.clear();
        self.ledger.clear();
        self.leaderboard_cache = None;
        self.connected_cache = None;
        self.pending_answers.clear();
    }

    // ── Persistence boundary ────────────────────────────────────────

    /// Push current state to the database collaborator. Best-effort: any
    /// failure is logged and swallowed so game logic never stalls on
    /// persistence.
    pub async fn sync_to_database<S: GameStore>(&mut self, store: &S, now: DateTime<Utc>) {
        match self.sync_inner(store).await {
            Ok(()) => {
                self.last_sync = now;
            }
            Err(error) => {
                warn!(pin = %self.pin, error = %format!("{error:#}"), "database sync failed; continuing in memory");
            }
        }
    }

    async fn sync_inner<S: GameStore>(&mut self, store: &S) -> anyhow::Result<()> {
        let game_id = match self.db_game_id {
            Some(id) => id,
            None => {
                let created = store
                    .create_game(&self.pin, &self.questions, None)
                    .await
                    .context("failed to create game row")?;
                self.db_game_id = Some(created.game_id);
                self.moderator_token = Some(created.moderator_token);
                created.game_id
            }
        };

        store
            .update_game_state(
                game_id,
                &GameStateUpdate {
                    phase: self.phase,
                    current_question_index: self.current_question_index,
                    question_started_at: self.question_started_at,
                },
            )
            .await
            .context("failed to update game state row")?;

        for player in self.players.values() {
            store
                .update_player_score(player.id, i64::from(player.score))
                .await
                .with_context(|| format!("failed to update score for player {}", player.id))?;
        }

        for answer in &self.pending_answers {
            store
                .save_answer(game_id, answer)
                .await
                .with_context(|| format!("failed to save answer for player {}", answer.player_id))?;
        }
        self.pending_answers.clear();
        Ok(())
    }
}

impl std::fmt::Debug for GameSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameSession")
            .field("pin", &self.pin)
            .field("phase", &self.phase)
            .field("players", &self.players.len())
            .field("question", &self.current_question_index)
            .finish_non_exhaustive()
    }
}
