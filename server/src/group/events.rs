//! Group lifecycle events.
//!
//! Events are collected while the model lock is held and delivered over a
//! channel after it is released, so listeners can call back into the model
//! without deadlocking.

use uuid::Uuid;

use super::manager::GroupSnapshot;

/// Something observable happened to a group.
#[derive(Debug, Clone)]
pub enum GroupEvent {
    GroupCreated {
        group: GroupSnapshot,
    },
    GroupDeleted {
        group_id: Uuid,
        name: String,
    },
    PlayerJoinedGroup {
        group_id: Uuid,
        player_id: Uuid,
    },
    PlayerLeftGroup {
        group_id: Uuid,
        player_id: Uuid,
        /// Set when ownership transferred because the creator left.
        new_creator: Option<Uuid>,
    },
}
