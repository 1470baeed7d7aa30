// Game PINs: the human-facing session identifier players type in.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of digits in a game PIN.
pub const PIN_LENGTH: usize = 6;

/// A 6-digit game PIN.
///
/// PINs are the only identifier players ever see; they are allocated by the
/// registry at game creation and must be unique among live games (the
/// registry retries on collision; see `SessionRegistry::create_game`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GamePin(String);

impl GamePin {
    /// Generate a random PIN. Leading zeros are allowed.
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let value: u32 = rng.gen_range(0..1_000_000);
        Self(format!("{value:06}"))
    }

    /// Parse a PIN from user input. Accepts exactly six ASCII digits.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        if trimmed.len() == PIN_LENGTH && trimmed.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GamePin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
