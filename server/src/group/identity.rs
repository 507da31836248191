//! Obfuscated client identifiers.
//!
//! Real player ids never leave the server; every outbound message and audio
//! header names a short session-scoped token instead. The map is a strict
//! bijection; both directions are updated under the same lock.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::Rng;
use uuid::Uuid;

use super::error::GroupError;

/// Attempts before giving up on finding a free token.
const MAX_TOKEN_ATTEMPTS: u32 = 1000;

#[derive(Default)]
struct Maps {
    forward: HashMap<Uuid, String>,
    reverse: HashMap<String, Uuid>,
}

/// Bijection between player ids and `p_xxxx` tokens.
#[derive(Default)]
pub struct ClientIdMap {
    maps: Mutex<Maps>,
}

impl ClientIdMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The token for a player, minting one on first use.
    pub fn obfuscate(&self, player_id: Uuid) -> Result<String, GroupError> {
        let mut maps = self.maps.lock().expect("id map lock");
        if let Some(token) = maps.forward.get(&player_id) {
            return Ok(token.clone());
        }

        let mut rng = rand::thread_rng();
        for _ in 0..MAX_TOKEN_ATTEMPTS {
            let token = format!("p_{:04x}", rng.gen_range(0..=0xffffu32));
            if !maps.reverse.contains_key(&token) {
                maps.forward.insert(player_id, token.clone());
                maps.reverse.insert(token.clone(), player_id);
                return Ok(token);
            }
        }
        Err(GroupError::IdSpaceExhausted)
    }

    /// The real id behind a token.
    #[must_use]
    pub fn resolve(&self, token: &str) -> Option<Uuid> {
        self.maps.lock().expect("id map lock").reverse.get(token).copied()
    }

    /// The existing token for a player, without minting.
    #[must_use]
    pub fn token_of(&self, player_id: Uuid) -> Option<String> {
        self.maps.lock().expect("id map lock").forward.get(&player_id).cloned()
    }

    /// Drop a player's mapping. Called on final session cleanup; resumable
    /// sessions keep their mapping until they expire.
    pub fn remove(&self, player_id: Uuid) {
        let mut maps = self.maps.lock().expect("id map lock");
        if let Some(token) = maps.forward.remove(&player_id) {
            maps.reverse.remove(&token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bijection_round_trip() {
        let map = ClientIdMap::new();
        let id = Uuid::new_v4();
        let token = map.obfuscate(id).unwrap();
        assert!(token.starts_with("p_"));
        assert_eq!(token.len(), 6);
        assert_eq!(map.resolve(&token), Some(id));
        // Stable across calls.
        assert_eq!(map.obfuscate(id).unwrap(), token);
    }

    #[test]
    fn removal_clears_both_directions() {
        let map = ClientIdMap::new();
        let id = Uuid::new_v4();
        let token = map.obfuscate(id).unwrap();

        map.remove(id);
        assert_eq!(map.resolve(&token), None);
        assert_eq!(map.token_of(id), None);
    }

    #[test]
    fn distinct_players_get_distinct_tokens() {
        let map = ClientIdMap::new();
        let a = map.obfuscate(Uuid::new_v4()).unwrap();
        let b = map.obfuscate(Uuid::new_v4()).unwrap();
        assert_ne!(a, b);
    }
}
