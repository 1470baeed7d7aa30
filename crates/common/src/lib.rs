// podium-common: shared types for the Podium quiz workspace

pub mod error;
pub mod pin;
pub mod types;
