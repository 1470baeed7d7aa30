// Server configuration.
//
// Loaded from `~/.podium/server.toml`; every knob the engine consults lives
// here so nothing is baked into game logic. Missing fields fall back to the
// defaults below.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root directory for Podium global state: `~/.podium/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".podium"))
}

/// Path to the server config file: `~/.podium/server.toml`.
pub fn server_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("server.toml"))
}

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Per-session limits and cache tuning.
    pub session: SessionConfig,
    /// Process-wide registry limits and sweep cadence.
    pub registry: RegistryConfig,
}

impl ServerConfig {
    /// Load from `~/.podium/server.toml`. Returns defaults if the file
    /// doesn't exist or can't be parsed.
    pub fn load() -> Self {
        server_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Limits and cache tuning for a single game session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum simultaneously-known players per session.
    pub max_players: usize,
    /// Capacity of the per-question answer ring buffer.
    pub max_answers_buffer: usize,
    /// Disconnected players are hard-removed after this many seconds idle.
    pub disconnected_player_ttl_secs: u64,
    /// Minimum seconds between per-session cleanup passes.
    pub cleanup_interval_secs: u64,
    /// Leaderboard cache lifetime in milliseconds.
    pub leaderboard_cache_ttl_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: 300,
            max_answers_buffer: 1000,
            disconnected_player_ttl_secs: 1800,
            cleanup_interval_secs: 300,
            leaderboard_cache_ttl_ms: 1000,
        }
    }
}

impl SessionConfig {
    pub fn disconnected_player_ttl(&self) -> Duration {
        Duration::seconds(self.disconnected_player_ttl_secs as i64)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::seconds(self.cleanup_interval_secs as i64)
    }

    pub fn leaderboard_cache_ttl(&self) -> Duration {
        Duration::milliseconds(self.leaderboard_cache_ttl_ms as i64)
    }
}

/// Process-wide limits and sweep cadence for the session registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Hard cap on simultaneously live games.
    pub max_active_games: usize,
    /// Memory ceiling used for pressure computation, in MiB.
    pub max_memory_usage_mb: u64,
    /// Finished games are removed after this many seconds idle. Games with
    /// zero connected players are removed after half of it.
    pub game_inactivity_timeout_secs: u64,
    /// Seconds between monitoring cycles (memory sampling + pressure check).
    pub monitor_interval_secs: u64,
    /// Seconds between routine cleanup sweeps.
    pub cleanup_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_active_games: 500,
            max_memory_usage_mb: 512,
            game_inactivity_timeout_secs: 3600,
            monitor_interval_secs: 30,
            cleanup_interval_secs: 60,
        }
    }
}

impl RegistryConfig {
    pub fn game_inactivity_timeout(&self) -> Duration {
        Duration::seconds(self.game_inactivity_timeout_secs as i64)
    }

    pub fn monitor_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.monitor_interval_secs)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_secs)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_limits() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.session.max_players, 300);
        assert_eq!(cfg.session.max_answers_buffer, 1000);
        assert_eq!(cfg.session.leaderboard_cache_ttl_ms, 1000);
        assert_eq!(cfg.registry.max_active_games, 500);
        assert_eq!(cfg.registry.game_inactivity_timeout_secs, 3600);
    }

    #[test]
    fn config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.toml");

        let cfg = ServerConfig {
            session: SessionConfig {
                max_players: 50,
                max_answers_buffer: 64,
                disconnected_player_ttl_secs: 60,
                cleanup_interval_secs: 10,
                leaderboard_cache_ttl_ms: 250,
            },
            registry: RegistryConfig {
                max_active_games: 8,
                max_memory_usage_mb: 64,
                game_inactivity_timeout_secs: 120,
                monitor_interval_secs: 5,
                cleanup_interval_secs: 15,
            },
        };
        cfg.save_to(&path).unwrap();
        let loaded = ServerConfig::load_from(&path).unwrap();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml_str = r#"
[session]
max_players = 12

[registry]
max_active_games = 3
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.session.max_players, 12);
        assert_eq!(cfg.session.max_answers_buffer, 1000); // default
        assert_eq!(cfg.registry.max_active_games, 3);
        assert_eq!(cfg.registry.max_memory_usage_mb, 512); // default
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let cfg: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, ServerConfig::default());
    }

    #[test]
    fn load_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.toml");
        assert!(ServerConfig::load_from(&path).is_err());
    }

    #[test]
    fn duration_accessors_convert_units() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.cleanup_interval().num_seconds(), 300);
        assert_eq!(cfg.leaderboard_cache_ttl().num_milliseconds(), 1000);
        let reg = RegistryConfig::default();
        assert_eq!(reg.game_inactivity_timeout().num_seconds(), 3600);
    }
}
