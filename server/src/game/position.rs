//! Player positions as the game reports them.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// A player's last known position in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerPosition {
    pub player_id: Uuid,
    pub username: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub world_id: String,
    pub captured_at: DateTime<Utc>,
}

impl PlayerPosition {
    /// Euclidean distance to `other`. Players in different worlds are
    /// infinitely far apart and never route audio to each other.
    #[must_use]
    pub fn distance_to(&self, other: &Self) -> f64 {
        if self.world_id != other.world_id {
            return f64::INFINITY;
        }
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dz.mul_add(dz, dx.mul_add(dx, dy * dy)).sqrt()
    }
}

/// Read-mostly view of player positions, updated by the game plugin.
pub trait PositionTracker: Send + Sync {
    fn get(&self, player_id: Uuid) -> Option<PlayerPosition>;
    fn all(&self) -> Vec<PlayerPosition>;
    fn update(&self, position: PlayerPosition);
    fn remove(&self, player_id: Uuid);
}

/// Tracker backed by a concurrent map.
#[derive(Default)]
pub struct InMemoryPositionTracker {
    positions: DashMap<Uuid, PlayerPosition>,
}

impl InMemoryPositionTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PositionTracker for InMemoryPositionTracker {
    fn get(&self, player_id: Uuid) -> Option<PlayerPosition> {
        self.positions.get(&player_id).map(|p| p.clone())
    }

    fn all(&self) -> Vec<PlayerPosition> {
        self.positions.iter().map(|p| p.clone()).collect()
    }

    fn update(&self, position: PlayerPosition) {
        self.positions.insert(position.player_id, position);
    }

    fn remove(&self, player_id: Uuid) {
        self.positions.remove(&player_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(world: &str, x: f64, y: f64, z: f64) -> PlayerPosition {
        PlayerPosition {
            player_id: Uuid::new_v4(),
            username: "p".into(),
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
            world_id: world.into(),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn euclidean_distance() {
        let a = at("overworld", 0.0, 0.0, 0.0);
        let b = at("overworld", 3.0, 4.0, 0.0);
        assert!((a.distance_to(&b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn cross_world_distance_is_infinite() {
        let a = at("overworld", 0.0, 0.0, 0.0);
        let b = at("nether", 0.0, 0.0, 0.0);
        assert_eq!(a.distance_to(&b), f64::INFINITY);
    }

    #[test]
    fn tracker_update_and_remove() {
        let tracker = InMemoryPositionTracker::new();
        let pos = at("overworld", 1.0, 2.0, 3.0);
        let id = pos.player_id;

        tracker.update(pos.clone());
        assert_eq!(tracker.get(id), Some(pos));

        tracker.remove(id);
        assert_eq!(tracker.get(id), None);
        assert!(tracker.all().is_empty());
    }
}
