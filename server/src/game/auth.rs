//! Login-code validation.
//!
//! The game plugin hands players short-lived codes; the client presents the
//! code over the signaling channel. The store resolves it back to the real
//! player id.

use dashmap::DashMap;
use uuid::Uuid;

/// Resolves `(username, code)` pairs issued by the game plugin.
pub trait AuthCodeStore: Send + Sync {
    /// Returns the player id when the code matches, consuming it.
    fn validate(&self, username: &str, code: &str) -> Option<Uuid>;
}

/// Code store backed by a concurrent map. Codes are single-use.
#[derive(Default)]
pub struct InMemoryAuthCodeStore {
    // username (lowercased) -> (code, player_id)
    codes: DashMap<String, (String, Uuid)>,
}

impl InMemoryAuthCodeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a code for a player. Replaces any previous code.
    pub fn issue(&self, username: &str, code: &str, player_id: Uuid) {
        self.codes
            .insert(username.to_lowercase(), (code.to_string(), player_id));
    }

    pub fn revoke(&self, username: &str) {
        self.codes.remove(&username.to_lowercase());
    }
}

impl AuthCodeStore for InMemoryAuthCodeStore {
    fn validate(&self, username: &str, code: &str) -> Option<Uuid> {
        let key = username.to_lowercase();
        let entry = self.codes.get(&key)?;
        if entry.0 != code {
            return None;
        }
        let player_id = entry.1;
        drop(entry);
        self.codes.remove(&key);
        Some(player_id)
    }
}
