//! Game-side collaborator interfaces.
//!
//! The voice core does not know how the game tracks players; it consumes
//! three narrow interfaces the embedding plugin provides: a position
//! tracker, a presence oracle, and an auth-code store. In-memory
//! implementations live here; they are what the bundled plugin bridge and
//! the test suite use.

mod auth;
mod position;

pub use auth::{AuthCodeStore, InMemoryAuthCodeStore};
pub use position::{InMemoryPositionTracker, PlayerPosition, PositionTracker};

use uuid::Uuid;

/// Answers whether a player currently has a live in-game session.
pub trait PlayerPresence: Send + Sync {
    fn is_player_online(&self, player_id: Uuid) -> bool;
}

/// Presence backed by a concurrent set, flipped by the plugin bridge.
#[derive(Default)]
pub struct InMemoryPlayerPresence {
    online: dashmap::DashSet<Uuid>,
}

impl InMemoryPlayerPresence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, player_id: Uuid, online: bool) {
        if online {
            self.online.insert(player_id);
        } else {
            self.online.remove(&player_id);
        }
    }
}

impl PlayerPresence for InMemoryPlayerPresence {
    fn is_player_online(&self, player_id: Uuid) -> bool {
        self.online.contains(&player_id)
    }
}
