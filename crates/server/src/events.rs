// Observer seam between the engine and the transport layer.
//
// The engine calls `on_event` after a state change; it never knows about
// rooms, sockets, or payload shaping. Observers must be cheap and must not
// block; heavy work belongs on the transport's side of the seam.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use podium_common::pin::GamePin;
use podium_common::types::PlayerSnapshot;

/// State changes the transport may want to broadcast.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    PlayerJoined { player: PlayerSnapshot, reconnected: bool },
    PlayerLeft { player_id: Uuid, permanent: bool },
    QuestionStarted { index: usize, deadline: Option<DateTime<Utc>> },
    QuestionEnded { index: usize, answers: usize },
    GameFinished,
    GameRemoved,
}

pub trait SessionObserver: Send + Sync {
    fn on_event(&self, pin: &GamePin, event: &SessionEvent);
}

/// Observer that ignores everything. Default for tests and headless runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {
    fn on_event(&self, _pin: &GamePin, _event: &SessionEvent) {}
}
