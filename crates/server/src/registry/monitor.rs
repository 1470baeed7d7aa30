// Resource monitoring and the background maintenance loops.
//
// Two independent timers run against the registry: a monitor cycle that
// samples process memory and picks a cleanup level from pressure, and a
// routine cleanup sweep. Every tick is individually guarded: one bad cycle
// is logged and the loop keeps going.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, warn};

use podium_common::types::MemoryStats;

use super::SessionRegistry;

/// Pressure above this triggers an aggressive cleanup.
pub const AGGRESSIVE_PRESSURE: f64 = 0.8;

/// Pressure above this triggers a routine cleanup.
pub const ROUTINE_PRESSURE: f64 = 0.6;

/// Cleanup intensity chosen by the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupLevel {
    None,
    Routine,
    Aggressive,
}

/// Pick a cleanup level from the worse of the two pressure ratios.
pub fn cleanup_level(memory_pressure: f64, session_pressure: f64) -> CleanupLevel {
    let pressure = memory_pressure.max(session_pressure);
    if pressure > AGGRESSIVE_PRESSURE {
        CleanupLevel::Aggressive
    } else if pressure > ROUTINE_PRESSURE {
        CleanupLevel::Routine
    } else {
        CleanupLevel::None
    }
}

/// Resident set size of this process, from `/proc/self/status`.
pub fn sample_rss_bytes() -> Result<u64> {
    let status = std::fs::read_to_string("/proc/self/status")
        .context("failed to read /proc/self/status")?;
    let line = status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .context("VmRSS line missing from /proc/self/status")?;
    let kibibytes = line
        .split_whitespace()
        .nth(1)
        .context("malformed VmRSS line")?
        .parse::<u64>()
        .context("VmRSS value is not a number")?;
    Ok(kibibytes.saturating_mul(1024))
}

impl SessionRegistry {
    /// Current resource snapshot. RSS sampling failures degrade to the
    /// per-session estimate instead of failing the caller.
    pub async fn memory_stats(&self) -> MemoryStats {
        let sessions = self.sessions.read().await;
        let active_games = sessions.len();
        let mut total_players = 0usize;
        let mut estimated_session_bytes = 0u64;
        for session in sessions.values() {
            let session = session.lock().await;
            total_players += session.player_count();
            estimated_session_bytes += session.memory_estimate();
        }
        drop(sessions);

        let rss_mb = match sample_rss_bytes() {
            Ok(bytes) => Some(bytes / (1024 * 1024)),
            Err(error) => {
                debug!(error = %format!("{error:#}"), "rss sampling unavailable");
                None
            }
        };
        let used_mb = rss_mb.unwrap_or(estimated_session_bytes / (1024 * 1024));

        let max_mb = self.registry_config.max_memory_usage_mb.max(1);
        let max_games = self.registry_config.max_active_games.max(1);
        MemoryStats {
            active_games,
            total_players,
            rss_mb,
            estimated_session_bytes,
            memory_pressure: used_mb as f64 / max_mb as f64,
            session_pressure: active_games as f64 / max_games as f64,
        }
    }

    /// One monitoring cycle: sample, compute pressure, dispatch cleanup.
    pub async fn run_monitor_cycle(&self) -> MemoryStats {
        let stats = self.memory_stats().await;
        let level = cleanup_level(stats.memory_pressure, stats.session_pressure);
        match level {
            CleanupLevel::Aggressive => {
                warn!(
                    memory_pressure = stats.memory_pressure,
                    session_pressure = stats.session_pressure,
                    active_games = stats.active_games,
                    "high pressure; running aggressive cleanup"
                );
                self.run_aggressive_cleanup(Utc::now()).await;
            }
            CleanupLevel::Routine => {
                debug!(
                    memory_pressure = stats.memory_pressure,
                    session_pressure = stats.session_pressure,
                    "elevated pressure; running routine cleanup"
                );
                self.run_cleanup(Utc::now()).await;
            }
            CleanupLevel::None => {}
        }
        stats
    }
}

/// Handle for the background maintenance tasks.
/// Dropping the handle aborts the loops.
pub struct MaintenanceHandle {
    shutdown_tx: watch::Sender<bool>,
    monitor_task: tokio::task::JoinHandle<()>,
    cleanup_task: tokio::task::JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal both loops to stop and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.monitor_task.await;
        let _ = self.cleanup_task.await;
    }
}

/// Spawn the monitor and cleanup loops for a registry.
pub fn spawn_maintenance(registry: Arc<SessionRegistry>) -> MaintenanceHandle {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_registry = Arc::clone(&registry);
    let mut monitor_shutdown = shutdown_rx.clone();
    let monitor_interval = registry.config().monitor_interval();
    let monitor_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(monitor_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stats = monitor_registry.run_monitor_cycle().await;
                    debug!(
                        active_games = stats.active_games,
                        total_players = stats.total_players,
                        "monitor cycle complete"
                    );
                }
                _ = monitor_shutdown.changed() => break,
            }
        }
    });

    let cleanup_registry = Arc::clone(&registry);
    let mut cleanup_shutdown = shutdown_rx;
    let cleanup_interval = registry.config().cleanup_interval();
    let cleanup_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cleanup_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cleanup_registry.run_cleanup(Utc::now()).await;
                }
                _ = cleanup_shutdown.changed() => break,
            }
        }
    });

    MaintenanceHandle { shutdown_tx, monitor_task, cleanup_task }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use podium_common::types::Question;

    use crate::config::{RegistryConfig, SessionConfig};
    use crate::events::NoopObserver;
    use crate::registry::SessionRegistry;

    use super::{cleanup_level, spawn_maintenance, CleanupLevel};

    fn question() -> Question {
        Question {
            prompt: "q".into(),
            options: vec!["a".into(), "b".into()],
            correct_option: 0,
            time_limit_secs: 30,
        }
    }

    #[test]
    fn cleanup_level_thresholds() {
        assert_eq!(cleanup_level(0.1, 0.2), CleanupLevel::None);
        assert_eq!(cleanup_level(0.61, 0.0), CleanupLevel::Routine);
        assert_eq!(cleanup_level(0.0, 0.7), CleanupLevel::Routine);
        assert_eq!(cleanup_level(0.81, 0.1), CleanupLevel::Aggressive);
        assert_eq!(cleanup_level(0.5, 0.95), CleanupLevel::Aggressive);
    }

    #[test]
    fn boundary_pressure_is_not_escalated() {
        assert_eq!(cleanup_level(0.6, 0.6), CleanupLevel::None);
        assert_eq!(cleanup_level(0.8, 0.8), CleanupLevel::Routine);
    }

    #[tokio::test]
    async fn memory_stats_reflect_population_and_pressure() {
        let mut config = RegistryConfig::default();
        config.max_active_games = 4;
        let registry =
            SessionRegistry::new(config, SessionConfig::default(), Arc::new(NoopObserver));
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        registry.create_game(vec![question()], now).await.unwrap();
        registry.create_game(vec![question()], now).await.unwrap();

        let stats = registry.memory_stats().await;
        assert_eq!(stats.active_games, 2);
        assert!((stats.session_pressure - 0.5).abs() < f64::EPSILON);
        assert!(stats.estimated_session_bytes > 0);
    }

    #[tokio::test]
    async fn monitor_cycle_evicts_under_session_pressure() {
        let mut config = RegistryConfig::default();
        config.max_active_games = 2;
        // Huge memory budget so only session pressure matters.
        config.max_memory_usage_mb = 1_000_000;
        config.game_inactivity_timeout_secs = 0;
        let registry =
            SessionRegistry::new(config, SessionConfig::default(), Arc::new(NoopObserver));
        let now = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        // Two abandoned games: session pressure 1.0 > 0.8.
        registry.create_game(vec![question()], now).await.unwrap();
        registry.create_game(vec![question()], now).await.unwrap();

        registry.run_monitor_cycle().await;
        // Abandoned games age out instantly with a zero timeout.
        assert_eq!(registry.active_count().await, 0);
    }

    #[tokio::test]
    async fn maintenance_handle_shuts_down_cleanly() {
        let mut config = RegistryConfig::default();
        config.monitor_interval_secs = 3600;
        config.cleanup_interval_secs = 3600;
        let registry = Arc::new(SessionRegistry::new(
            config,
            SessionConfig::default(),
            Arc::new(NoopObserver),
        ));
        let handle = spawn_maintenance(Arc::clone(&registry));
        handle.shutdown().await;
    }
}
