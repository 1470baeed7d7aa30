// Error taxonomy for the session engine.
//
// Only conditions the caller must surface to a user are errors. Expected
// high-frequency rejections (duplicate answer, unknown player, no active
// question) are represented as `None` returns on the session API instead, so
// real-world network jitter produces neither log noise nor crash paths.

use thiserror::Error;

use crate::pin::GamePin;

/// Failures from operations on a single game session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// A brand-new player tried to join a full session. Reconnections of an
    /// existing player never hit this, even at the limit.
    #[error("game {pin} is full ({max_players} players)")]
    CapacityExceeded { pin: GamePin, max_players: usize },
}

/// Failures from the process-wide session registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("active game limit reached ({max_active_games})")]
    GameLimitReached { max_active_games: usize },

    /// PIN allocation kept colliding with live games.
    #[error("could not allocate a unique game PIN after {attempts} attempts")]
    PinSpaceExhausted { attempts: u32 },

    #[error("game {0} not found")]
    GameNotFound(GamePin),
}

#[cfg(test)]
mod tests {
    use super::{RegistryError, SessionError};
    use crate::pin::GamePin;

    #[test]
    fn capacity_error_names_the_pin_and_limit() {
        let error = SessionError::CapacityExceeded {
            pin: GamePin::parse("123456").unwrap(),
            max_players: 300,
        };
        assert_eq!(error.to_string(), "game 123456 is full (300 players)");
    }

    #[test]
    fn registry_errors_render_useful_messages() {
        let limit = RegistryError::GameLimitReached { max_active_games: 500 };
        assert!(limit.to_string().contains("500"));
        let missing = RegistryError::GameNotFound(GamePin::parse("654321").unwrap());
        assert!(missing.to_string().contains("654321"));
    }
}
