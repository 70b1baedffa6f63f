use chrono::{DateTime, Utc};
use serde::Serialize;

use super::conversation::Turn;

/// Emitted once for every turn committed to a session's conversation log.
#[derive(Debug, Clone, Serialize)]
pub struct TurnEvent {
    /// Position of the turn in the log.
    pub index: usize,
    pub turn: Turn,
    pub appended_at: DateTime<Utc>,
}

impl TurnEvent {
    pub fn event_name(&self) -> &'static str {
        "turn_appended"
    }
}
