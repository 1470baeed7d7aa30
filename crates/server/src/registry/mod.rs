// Process-wide owner of all game sessions.
//
// The registry is constructed once and passed around by `Arc`, never a
// global. It shares sessions with the transport (each behind its own mutex,
// so sessions never contend with each other) but holds sole authority over
// removal: `remove_game` is the only deletion path.

pub mod monitor;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use podium_common::error::RegistryError;
use podium_common::pin::GamePin;
use podium_common::types::{Question, RegistryStats};

use crate::config::{RegistryConfig, SessionConfig};
use crate::events::{NoopObserver, SessionEvent, SessionObserver};
use crate::session::GameSession;

/// PIN allocation gives up after this many collisions in a row.
const MAX_PIN_ATTEMPTS: u32 = 32;

/// Outcome of one cleanup sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub sessions_swept: usize,
    pub players_removed: usize,
    pub games_removed: usize,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<GamePin, Arc<Mutex<GameSession>>>>,
    registry_config: RegistryConfig,
    session_config: SessionConfig,
    observer: Arc<dyn SessionObserver>,
    stats: StdMutex<RegistryStats>,
}

impl SessionRegistry {
    pub fn new(
        registry_config: RegistryConfig,
        session_config: SessionConfig,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            registry_config,
            session_config,
            observer,
            stats: StdMutex::new(RegistryStats::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default(), SessionConfig::default(), Arc::new(NoopObserver))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.registry_config
    }

    /// Create a new game with a freshly allocated PIN.
    pub async fn create_game(
        &self,
        questions: Vec<Question>,
        now: DateTime<Utc>,
    ) -> Result<(GamePin, Arc<Mutex<GameSession>>), RegistryError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.registry_config.max_active_games {
            return Err(RegistryError::GameLimitReached {
                max_active_games: self.registry_config.max_active_games,
            });
        }

        let pin = allocate_pin(&sessions)?;
        let session = Arc::new(Mutex::new(GameSession::new(
            pin.clone(),
            questions,
            self.session_config.clone(),
            Arc::clone(&self.observer),
            now,
        )));
        sessions.insert(pin.clone(), Arc::clone(&session));
        info!(%pin, active = sessions.len(), "game created");
        Ok((pin, session))
    }

    pub async fn get(&self, pin: &GamePin) -> Option<Arc<Mutex<GameSession>>> {
        self.sessions.read().await.get(pin).cloned()
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// The single authoritative deletion path. Calls the session's release
    /// hook (which never errors outward), updates cumulative stats, and
    /// notifies the observer. Removing an already-removed PIN is a no-op.
    pub async fn remove_game(&self, pin: &GamePin) -> bool {
        let removed = self.sessions.write().await.remove(pin);
        let Some(session) = removed else {
            return false;
        };

        let (players, reclaimed) = {
            let mut session = session.lock().await;
            let players = session.player_count();
            let reclaimed = session.memory_estimate();
            session.release();
            (players, reclaimed)
        };

        {
            let mut stats = self.stats.lock().expect("registry stats lock poisoned");
            stats.games_removed += 1;
            stats.players_removed += players as u64;
            stats.reclaimed_bytes_estimate += reclaimed;
        }
        info!(%pin, players, reclaimed_bytes = reclaimed, "game removed");
        self.observer.on_event(pin, &SessionEvent::GameRemoved);
        true
    }

    /// Whether a session is eligible for removal: finished and idle past the
    /// inactivity timeout, or fully abandoned for half of it.
    pub fn should_remove_game(
        session: &GameSession,
        now: DateTime<Utc>,
        config: &RegistryConfig,
    ) -> bool {
        let idle = now - session.last_activity();
        let timeout = config.game_inactivity_timeout();
        if session.phase().is_terminal() && idle > timeout {
            return true;
        }
        session.connected_players() == 0 && idle > timeout / 2
    }

    /// Routine sweep: delegate per-session cleanup, then remove every
    /// session that has aged out.
    pub async fn run_cleanup(&self, now: DateTime<Utc>) -> CleanupReport {
        let snapshot: Vec<(GamePin, Arc<Mutex<GameSession>>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(pin, session)| (pin.clone(), Arc::clone(session))).collect()
        };

        let mut report = CleanupReport { sessions_swept: snapshot.len(), ..Default::default() };
        let mut expired: Vec<GamePin> = Vec::new();
        for (pin, session) in snapshot {
            let mut session = session.lock().await;
            report.players_removed += session.perform_memory_cleanup(now);
            if Self::should_remove_game(&session, now, &self.registry_config) {
                expired.push(pin);
            }
        }

        for pin in expired {
            if self.remove_game(&pin).await {
                report.games_removed += 1;
            }
        }

        {
            let mut stats = self.stats.lock().expect("registry stats lock poisoned");
            stats.cleanup_runs += 1;
            stats.players_removed += report.players_removed as u64;
        }
        debug!(
            swept = report.sessions_swept,
            players = report.players_removed,
            games = report.games_removed,
            "cleanup sweep finished"
        );
        report
    }

    /// Pressure response: drop the oldest-idle half of the finished games
    /// (rounded up), then run a routine sweep.
    pub async fn run_aggressive_cleanup(&self, now: DateTime<Utc>) -> CleanupReport {
        let mut finished: Vec<(GamePin, DateTime<Utc>)> = Vec::new();
        {
            let sessions = self.sessions.read().await;
            for (pin, session) in sessions.iter() {
                let session = session.lock().await;
                if session.phase().is_terminal() {
                    finished.push((pin.clone(), session.last_activity()));
                }
            }
        }
        // Oldest idle first.
        finished.sort_by_key(|(_, last_activity)| *last_activity);
        let to_remove = finished.len().div_ceil(2);

        let mut evicted = 0;
        for (pin, _) in finished.into_iter().take(to_remove) {
            if self.remove_game(&pin).await {
                evicted += 1;
            }
        }
        if evicted > 0 {
            info!(evicted, "aggressive cleanup evicted finished games");
        }
        {
            let mut stats = self.stats.lock().expect("registry stats lock poisoned");
            stats.aggressive_runs += 1;
        }

        let mut report = self.run_cleanup(now).await;
        report.games_removed += evicted;
        report
    }

    pub fn stats(&self) -> RegistryStats {
        *self.stats.lock().expect("registry stats lock poisoned")
    }
}

fn allocate_pin(
    live: &HashMap<GamePin, Arc<Mutex<GameSession>>>,
) -> Result<GamePin, RegistryError> {
    let mut rng = rand::thread_rng();
    for _ in 0..MAX_PIN_ATTEMPTS {
        let pin = GamePin::generate(&mut rng);
        if !live.contains_key(&pin) {
            return Ok(pin);
        }
    }
    Err(RegistryError::PinSpaceExhausted { attempts: MAX_PIN_ATTEMPTS })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use uuid::Uuid;

    use podium_common::error::RegistryError;
    use podium_common::types::{Phase, Question};

    use crate::config::{RegistryConfig, SessionConfig};
    use crate::events::NoopObserver;

    use super::SessionRegistry;

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("timestamp should be valid")
    }

    fn question() -> Question {
        Question {
            prompt: "2 + 2?".into(),
            options: vec!["3".into(), "4".into()],
            correct_option: 1,
            time_limit_secs: 30,
        }
    }

    fn registry_with(registry_config: RegistryConfig) -> SessionRegistry {
        SessionRegistry::new(registry_config, SessionConfig::default(), Arc::new(NoopObserver))
    }

    async fn finish_game(registry: &SessionRegistry, now: DateTime<Utc>) -> podium_common::pin::GamePin {
        let (pin, session) = registry.create_game(vec![question()], now).await.unwrap();
        let mut session = session.lock().await;
        session.start_question(now);
        session.end_question(now);
        session.next_question(now);
        assert_eq!(session.phase(), Phase::Finished);
        drop(session);
        pin
    }

    #[tokio::test]
    async fn create_allocates_unique_pins() {
        let registry = SessionRegistry::with_defaults();
        let now = ts(1_700_000_000);
        let (a, _) = registry.create_game(vec![question()], now).await.unwrap();
        let (b, _) = registry.create_game(vec![question()], now).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.active_count().await, 2);
        assert!(registry.get(&a).await.is_some());
    }

    #[tokio::test]
    async fn create_enforces_the_active_game_limit() {
        let mut config = RegistryConfig::default();
        config.max_active_games = 2;
        let registry = registry_with(config);
        let now = ts(1_700_000_000);
        registry.create_game(vec![question()], now).await.unwrap();
        registry.create_game(vec![question()], now).await.unwrap();

        let error = registry.create_game(vec![question()], now).await.unwrap_err();
        assert_eq!(error, RegistryError::GameLimitReached { max_active_games: 2 });
    }

    #[tokio::test]
    async fn remove_game_is_idempotent_and_updates_stats() {
        let registry = SessionRegistry::with_defaults();
        let now = ts(1_700_000_000);
        let (pin, session) = registry.create_game(vec![question()], now).await.unwrap();
        session.lock().await.add_player(Uuid::new_v4(), "a", None, None, now).unwrap();

        assert!(registry.remove_game(&pin).await);
        assert!(registry.get(&pin).await.is_none());
        // Second delete of the same PIN is a no-op, not a double-count.
        assert!(!registry.remove_game(&pin).await);

        let stats = registry.stats();
        assert_eq!(stats.games_removed, 1);
        assert_eq!(stats.players_removed, 1);
        assert!(stats.reclaimed_bytes_estimate > 0);
    }

    #[tokio::test]
    async fn should_remove_finished_game_after_inactivity_timeout() {
        let mut config = RegistryConfig::default();
        config.game_inactivity_timeout_secs = 600;
        let registry = registry_with(config.clone());
        let now = ts(1_700_000_000);
        let pin = finish_game(&registry, now).await;
        // A connected player keeps the abandoned-game rule out of the way;
        // only the finished-game timeout is under test here.
        {
            let session = registry.get(&pin).await.unwrap();
            session.lock().await.add_player(Uuid::new_v4(), "a", None, None, now).unwrap();
        }

        let session = registry.get(&pin).await.unwrap();
        let session = session.lock().await;
        assert!(!SessionRegistry::should_remove_game(
            &session,
            now + Duration::seconds(599),
            &config
        ));
        assert!(SessionRegistry::should_remove_game(
            &session,
            now + Duration::seconds(601),
            &config
        ));
    }

    #[tokio::test]
    async fn recent_player_activity_blocks_removal() {
        let mut config = RegistryConfig::default();
        config.game_inactivity_timeout_secs = 600;
        let registry = registry_with(config.clone());
        let now = ts(1_700_000_000);
        let (pin, session_arc) = registry.create_game(vec![question()], now).await.unwrap();
        {
            let mut session = session_arc.lock().await;
            session
                .add_player(Uuid::new_v4(), "a", None, None, now + Duration::seconds(550))
                .unwrap();
        }

        let session = registry.get(&pin).await.unwrap();
        let session = session.lock().await;
        assert!(!SessionRegistry::should_remove_game(
            &session,
            now + Duration::seconds(600),
            &config
        ));
    }

    #[tokio::test]
    async fn abandoned_game_is_removable_at_half_timeout() {
        let mut config = RegistryConfig::default();
        config.game_inactivity_timeout_secs = 600;
        let registry = registry_with(config.clone());
        let now = ts(1_700_000_000);
        // Waiting game, zero connected players.
        let (pin, _) = registry.create_game(vec![question()], now).await.unwrap();

        let session = registry.get(&pin).await.unwrap();
        let session = session.lock().await;
        assert!(!SessionRegistry::should_remove_game(
            &session,
            now + Duration::seconds(299),
            &config
        ));
        assert!(SessionRegistry::should_remove_game(
            &session,
            now + Duration::seconds(301),
            &config
        ));
    }

    #[tokio::test]
    async fn run_cleanup_removes_aged_out_games() {
        let mut config = RegistryConfig::default();
        config.game_inactivity_timeout_secs = 600;
        let registry = registry_with(config);
        let now = ts(1_700_000_000);
        let old = finish_game(&registry, now).await;
        // A fresh game with a connected player survives the sweep.
        let (fresh, fresh_session) = registry.create_game(vec![question()], now).await.unwrap();
        fresh_session
            .lock()
            .await
            .add_player(Uuid::new_v4(), "a", None, None, now + Duration::seconds(700))
            .unwrap();

        let report = registry.run_cleanup(now + Duration::seconds(700)).await;
        assert_eq!(report.games_removed, 1);
        assert!(registry.get(&old).await.is_none());
        assert!(registry.get(&fresh).await.is_some());
        assert_eq!(registry.stats().cleanup_runs, 1);
    }

    #[tokio::test]
    async fn aggressive_cleanup_evicts_oldest_half_of_finished_games() {
        let mut config = RegistryConfig::default();
        // Large timeout so routine eviction never fires in this test.
        config.game_inactivity_timeout_secs = 1_000_000;
        let registry = registry_with(config);

        let mut pins = Vec::new();
        for i in 0..3 {
            // Stagger idle times: pins[0] is the oldest.
            let created = ts(1_700_000_000 + i * 100);
            pins.push(finish_game(&registry, created).await);
        }

        let report = registry.run_aggressive_cleanup(ts(1_700_001_000)).await;
        // ceil(3 / 2) = 2 evicted, oldest first.
        assert_eq!(report.games_removed, 2);
        assert!(registry.get(&pins[0]).await.is_none());
        assert!(registry.get(&pins[1]).await.is_none());
        assert!(registry.get(&pins[2]).await.is_some());
        assert_eq!(registry.stats().aggressive_runs, 1);
    }
}
