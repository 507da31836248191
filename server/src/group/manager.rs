//! Group membership model.
//!
//! All mutation happens under a single process-wide lock; listener delivery
//! happens strictly after the lock is released. Nested membership moves
//! (join leaving a previous group first) run as plain calls on the locked
//! state rather than re-entrant public calls.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Utc};
use gv_protocol::messages::GroupSettingsData;
use regex::Regex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use super::error::GroupError;
use super::events::GroupEvent;
use super::settings::GroupSettings;

/// Minimum group name length; the maximum comes from [`GroupLimits`].
const MIN_GROUP_NAME_LENGTH: usize = 3;

/// Characters a group name may contain.
fn name_pattern() -> &'static Regex {
    static PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9 \-]+$").expect("static regex"))
}

/// Server-level bounds applied to every group.
#[derive(Debug, Clone)]
pub struct GroupLimits {
    pub max_name_length: usize,
    pub default_proximity_range: f64,
    pub max_voice_distance: f64,
    pub default_max_members: u32,
    pub default_isolated: bool,
}

impl GroupLimits {
    /// Member cap applied when a creator does not choose one.
    pub const DEFAULT_MAX_MEMBERS: u32 = 16;

    #[must_use]
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_name_length: config.max_group_name_length,
            default_proximity_range: config.default_proximity_distance,
            max_voice_distance: config.max_voice_distance,
            default_max_members: Self::DEFAULT_MAX_MEMBERS,
            default_isolated: config.default_group_is_isolated,
        }
    }
}

/// Immutable view of one group, safe to hand out of the lock.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSnapshot {
    pub id: Uuid,
    pub name: String,
    pub is_permanent: bool,
    pub is_isolated: bool,
    pub creator_id: Option<Uuid>,
    /// Members in ascending-uuid order.
    pub members: Vec<Uuid>,
    pub settings: GroupSettings,
    pub has_password: bool,
    pub created_at: DateTime<Utc>,
}

/// Result of removing a player from their group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub group_id: Uuid,
    /// Set when ownership transferred because the creator left.
    pub new_creator: Option<Uuid>,
    /// The group was empty and non-permanent and has been removed.
    pub disbanded: bool,
}

struct GroupRecord {
    id: Uuid,
    name: String,
    is_permanent: bool,
    is_isolated: bool,
    creator_id: Option<Uuid>,
    members: BTreeSet<Uuid>,
    settings: GroupSettings,
    password_hash: Option<String>,
    created_at: DateTime<Utc>,
}

impl GroupRecord {
    fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            id: self.id,
            name: self.name.clone(),
            is_permanent: self.is_permanent,
            is_isolated: self.is_isolated,
            creator_id: self.creator_id,
            members: self.members.iter().copied().collect(),
            settings: self.settings.clone(),
            has_password: self.password_hash.is_some(),
            created_at: self.created_at,
        }
    }
}

#[derive(Default)]
struct Inner {
    groups: HashMap<Uuid, GroupRecord>,
    by_player: HashMap<Uuid, Uuid>,
}

/// The group model. One per server.
pub struct GroupManager {
    limits: GroupLimits,
    inner: Mutex<Inner>,
    events: Mutex<Option<mpsc::UnboundedSender<GroupEvent>>>,
}

impl GroupManager {
    #[must_use]
    pub fn new(limits: GroupLimits) -> Self {
        Self {
            limits,
            inner: Mutex::new(Inner::default()),
            events: Mutex::new(None),
        }
    }

    /// Subscribe to group events. Only the latest subscriber receives them.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GroupEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().expect("events lock") = Some(tx);
        rx
    }

    fn emit(&self, events: Vec<GroupEvent>) {
        if events.is_empty() {
            return;
        }
        let guard = self.events.lock().expect("events lock");
        if let Some(tx) = guard.as_ref() {
            for event in events {
                // A dropped listener is not an error; events are best-effort.
                let _ = tx.send(event);
            }
        }
    }

    fn validate_name(&self, name: &str) -> Result<(), GroupError> {
        if name.len() < MIN_GROUP_NAME_LENGTH || name.len() > self.limits.max_name_length {
            return Err(GroupError::InvalidName(format!(
                "name must be {MIN_GROUP_NAME_LENGTH}-{} characters",
                self.limits.max_name_length
            )));
        }
        if !name_pattern().is_match(name) {
            return Err(GroupError::InvalidName(
                "name may only contain letters, digits, spaces and dashes".into(),
            ));
        }
        Ok(())
    }

    /// Create a group with the creator as its first member. The permanent
    /// flag is admin-gated by the caller.
    pub fn create_group(
        &self,
        name: &str,
        permanent: bool,
        creator_id: Uuid,
        settings_data: &GroupSettingsData,
        isolated: Option<bool>,
        password: Option<&str>,
    ) -> Result<GroupSnapshot, GroupError> {
        self.validate_name(name)?;
        // Hash outside the lock; argon2 is deliberately slow.
        let password_hash = password.map(hash_password).transpose()?;

        let settings = GroupSettings::from_wire(
            settings_data,
            self.limits.default_proximity_range,
            self.limits.max_voice_distance,
            self.limits.default_max_members,
        );

        let mut events = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock().expect("group lock");
            let lowered = name.to_lowercase();
            if inner.groups.values().any(|g| g.name.to_lowercase() == lowered) {
                return Err(GroupError::NameTaken(name.to_string()));
            }

            // Creating a group implies leaving the previous one.
            Self::leave_locked(&mut inner, creator_id, &mut events);

            let record = GroupRecord {
                id: Uuid::new_v4(),
                name: name.to_string(),
                is_permanent: permanent,
                is_isolated: isolated.unwrap_or(self.limits.default_isolated),
                creator_id: Some(creator_id),
                members: BTreeSet::from([creator_id]),
                settings,
                password_hash,
                created_at: Utc::now(),
            };
            let snapshot = record.snapshot();
            inner.by_player.insert(creator_id, record.id);
            inner.groups.insert(record.id, record);

            events.push(GroupEvent::GroupCreated {
                group: snapshot.clone(),
            });
            events.push(GroupEvent::PlayerJoinedGroup {
                group_id: snapshot.id,
                player_id: creator_id,
            });
            snapshot
        };

        debug!(group_id = %snapshot.id, name = %snapshot.name, "Group created");
        self.emit(events);
        Ok(snapshot)
    }

    /// Add a player, leaving any previous group first. Password checks are
    /// the caller's job (`verify_password`).
    pub fn join_group(&self, player_id: Uuid, group_id: Uuid) -> Result<GroupSnapshot, GroupError> {
        let mut events = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock().expect("group lock");
            let group = inner
                .groups
                .get(&group_id)
                .ok_or(GroupError::GroupNotFound(group_id))?;

            if group.members.contains(&player_id) {
                return Ok(group.snapshot());
            }
            if group.members.len() as u32 >= group.settings.max_members {
                return Err(GroupError::GroupFull {
                    max_members: group.settings.max_members,
                });
            }

            // Capacity verified; now it is safe to vacate the old group.
            Self::leave_locked(&mut inner, player_id, &mut events);

            let group = inner.groups.get_mut(&group_id).expect("checked above");
            group.members.insert(player_id);
            let snapshot = group.snapshot();
            inner.by_player.insert(player_id, group_id);

            events.push(GroupEvent::PlayerJoinedGroup { group_id, player_id });
            snapshot
        };

        debug!(group_id = %group_id, player_id = %player_id, "Player joined group");
        self.emit(events);
        Ok(snapshot)
    }

    /// Remove a player from their group, transferring ownership or
    /// disbanding as needed.
    pub fn leave_group(&self, player_id: Uuid) -> Result<LeaveOutcome, GroupError> {
        let mut events = Vec::new();
        let outcome = {
            let mut inner = self.inner.lock().expect("group lock");
            Self::leave_locked(&mut inner, player_id, &mut events)
                .ok_or(GroupError::NotInGroup(player_id))?
        };
        self.emit(events);
        Ok(outcome)
    }

    /// Shared leave path; requires the lock to be held.
    fn leave_locked(
        inner: &mut Inner,
        player_id: Uuid,
        events: &mut Vec<GroupEvent>,
    ) -> Option<LeaveOutcome> {
        let group_id = inner.by_player.remove(&player_id)?;
        let group = inner.groups.get_mut(&group_id)?;
        group.members.remove(&player_id);

        let mut new_creator = None;
        if group.creator_id == Some(player_id) {
            // Ownership moves to the smallest remaining member id, a
            // deterministic total order.
            new_creator = group.members.iter().next().copied();
            group.creator_id = new_creator;
        }

        let disbanded = group.members.is_empty() && !group.is_permanent;
        if disbanded {
            let removed = inner.groups.remove(&group_id).expect("present");
            events.push(GroupEvent::PlayerLeftGroup {
                group_id,
                player_id,
                new_creator: None,
            });
            events.push(GroupEvent::GroupDeleted {
                group_id,
                name: removed.name,
            });
        } else {
            events.push(GroupEvent::PlayerLeftGroup {
                group_id,
                player_id,
                new_creator,
            });
        }

        Some(LeaveOutcome {
            group_id,
            new_creator,
            disbanded,
        })
    }

    /// Replace a group's settings. Creator only; inputs are clamped and the
    /// member cap never drops below the current member count.
    pub fn update_settings(
        &self,
        group_id: Uuid,
        requester_id: Uuid,
        settings_data: &GroupSettingsData,
    ) -> Result<GroupSnapshot, GroupError> {
        let mut inner = self.inner.lock().expect("group lock");
        let group = inner
            .groups
            .get_mut(&group_id)
            .ok_or(GroupError::GroupNotFound(group_id))?;
        if group.creator_id != Some(requester_id) {
            return Err(GroupError::NotCreator(requester_id));
        }

        let mut settings = GroupSettings::from_wire(
            settings_data,
            self.limits.default_proximity_range,
            self.limits.max_voice_distance,
            self.limits.default_max_members,
        );
        settings.max_members = settings.max_members.max(group.members.len() as u32);
        group.settings = settings;
        Ok(group.snapshot())
    }

    /// Flip the isolation flag. Creator only.
    pub fn set_isolated(
        &self,
        group_id: Uuid,
        requester_id: Uuid,
        isolated: bool,
    ) -> Result<GroupSnapshot, GroupError> {
        let mut inner = self.inner.lock().expect("group lock");
        let group = inner
            .groups
            .get_mut(&group_id)
            .ok_or(GroupError::GroupNotFound(group_id))?;
        if group.creator_id != Some(requester_id) {
            return Err(GroupError::NotCreator(requester_id));
        }
        group.is_isolated = isolated;
        Ok(group.snapshot())
    }

    /// Set or clear the password. Creator only. Returns whether the group
    /// now has one.
    pub fn update_password(
        &self,
        group_id: Uuid,
        requester_id: Uuid,
        password: Option<&str>,
    ) -> Result<bool, GroupError> {
        let hash = password.map(hash_password).transpose()?;
        let mut inner = self.inner.lock().expect("group lock");
        let group = inner
            .groups
            .get_mut(&group_id)
            .ok_or(GroupError::GroupNotFound(group_id))?;
        if group.creator_id != Some(requester_id) {
            return Err(GroupError::NotCreator(requester_id));
        }
        group.password_hash = hash;
        Ok(group.password_hash.is_some())
    }

    /// Toggle the permanent flag. Admin gating happens at the signaling
    /// layer. Demoting an empty group disbands it immediately.
    pub fn set_permanent(
        &self,
        group_id: Uuid,
        permanent: bool,
    ) -> Result<GroupSnapshot, GroupError> {
        let mut events = Vec::new();
        let snapshot = {
            let mut inner = self.inner.lock().expect("group lock");
            let group = inner
                .groups
                .get_mut(&group_id)
                .ok_or(GroupError::GroupNotFound(group_id))?;
            group.is_permanent = permanent;
            let snapshot = group.snapshot();
            if !permanent && group.members.is_empty() {
                let removed = inner.groups.remove(&group_id).expect("present");
                events.push(GroupEvent::GroupDeleted {
                    group_id,
                    name: removed.name,
                });
            }
            snapshot
        };
        self.emit(events);
        Ok(snapshot)
    }

    /// Check a join attempt against the group's password, if any.
    pub fn verify_password(
        &self,
        group_id: Uuid,
        supplied: Option<&str>,
    ) -> Result<(), GroupError> {
        let hash = {
            let inner = self.inner.lock().expect("group lock");
            let group = inner
                .groups
                .get(&group_id)
                .ok_or(GroupError::GroupNotFound(group_id))?;
            match &group.password_hash {
                None => return Ok(()),
                Some(hash) => hash.clone(),
            }
        };
        // Verify outside the lock; argon2 is deliberately slow.
        match supplied {
            Some(password) if verify_password(&hash, password) => Ok(()),
            _ => Err(GroupError::IncorrectPassword),
        }
    }

    #[must_use]
    pub fn list_groups(&self) -> Vec<GroupSnapshot> {
        let inner = self.inner.lock().expect("group lock");
        let mut groups: Vec<_> = inner.groups.values().map(GroupRecord::snapshot).collect();
        groups.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        groups
    }

    #[must_use]
    pub fn get_group(&self, group_id: Uuid) -> Option<GroupSnapshot> {
        let inner = self.inner.lock().expect("group lock");
        inner.groups.get(&group_id).map(GroupRecord::snapshot)
    }

    #[must_use]
    pub fn get_player_group(&self, player_id: Uuid) -> Option<GroupSnapshot> {
        let inner = self.inner.lock().expect("group lock");
        let group_id = inner.by_player.get(&player_id)?;
        inner.groups.get(group_id).map(GroupRecord::snapshot)
    }

    pub fn get_members(&self, group_id: Uuid) -> Result<Vec<Uuid>, GroupError> {
        let inner = self.inner.lock().expect("group lock");
        inner
            .groups
            .get(&group_id)
            .map(|g| g.members.iter().copied().collect())
            .ok_or(GroupError::GroupNotFound(group_id))
    }

    /// Disconnect handling is identical to leaving.
    pub fn handle_player_disconnect(&self, player_id: Uuid) -> Option<LeaveOutcome> {
        self.leave_group(player_id).ok()
    }

    /// Drop non-permanent groups and all membership mappings.
    pub fn shutdown(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock().expect("group lock");
            inner.by_player.clear();
            inner.groups.retain(|group_id, group| {
                group.members.clear();
                group.creator_id = None;
                if group.is_permanent {
                    true
                } else {
                    events.push(GroupEvent::GroupDeleted {
                        group_id: *group_id,
                        name: group.name.clone(),
                    });
                    false
                }
            });
        }
        self.emit(events);
    }
}

fn hash_password(password: &str) -> Result<String, GroupError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| GroupError::PasswordHash(e.to_string()))
}

fn verify_password(hash: &str, password: &str) -> bool {
    PasswordHash::new(hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}
