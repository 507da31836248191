//! Recipient-set computation.
//!
//! Pure routing logic: given the sender's position and group plus a view of
//! every live candidate target, decide who hears the frame and how. Group
//! members are considered first; everyone else goes through the proximity
//! path with isolation filtering.

use uuid::Uuid;

use crate::game::PlayerPosition;
use crate::group::GroupSnapshot;

/// How a recipient's gain is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMode {
    /// Distance-scaled.
    Normal,
    /// No scaling; global group voice.
    FullVolume,
    /// Distance-scaled but floored at the configured group minimum.
    MinVolume,
}

/// One resolved recipient of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipient {
    pub client_id: Uuid,
    pub distance: f64,
    pub max_range: f64,
    pub mode: RouteMode,
}

/// A live client as the router sees it.
#[derive(Debug, Clone)]
pub struct RouteTarget {
    pub client_id: Uuid,
    pub position: Option<PlayerPosition>,
    pub group_id: Option<Uuid>,
    pub group_isolated: bool,
}

/// Routing switches lifted out of the server config.
#[derive(Debug, Clone)]
pub struct RoutePolicy {
    pub group_global_voice: bool,
    pub group_spatial_audio: bool,
    /// Range of the non-group proximity path.
    pub proximity_distance: f64,
}

/// Compute the recipient set for one frame.
#[must_use]
pub fn compute_recipients(
    sender_id: Uuid,
    sender_pos: &PlayerPosition,
    sender_group: Option<&GroupSnapshot>,
    targets: &[RouteTarget],
    policy: &RoutePolicy,
) -> Vec<Recipient> {
    let mut recipients: Vec<Recipient> = Vec::new();

    // Group path: members of the sender's group by the group's own range.
    if let Some(group) = sender_group {
        let range = group.settings.proximity_range;
        for member in &group.members {
            if *member == sender_id {
                continue;
            }
            let Some(target) = targets.iter().find(|t| t.client_id == *member) else {
                continue;
            };
            let Some(position) = &target.position else {
                continue;
            };
            let distance = sender_pos.distance_to(position);
            if distance.is_infinite() {
                continue;
            }

            let mode = if policy.group_global_voice {
                if policy.group_spatial_audio && distance <= range {
                    RouteMode::MinVolume
                } else {
                    RouteMode::FullVolume
                }
            } else if distance <= range {
                RouteMode::Normal
            } else {
                continue;
            };

            recipients.push(Recipient {
                client_id: *member,
                distance,
                max_range: range,
                mode,
            });
        }
    }

    // Proximity path: everyone else in earshot, honoring isolation.
    let sender_group_id = sender_group.map(|g| g.id);
    let sender_isolated = sender_group.is_some_and(|g| g.is_isolated);
    for target in targets {
        if target.client_id == sender_id
            || recipients.iter().any(|r| r.client_id == target.client_id)
        {
            continue;
        }
        // An isolated group hears and is heard by itself only.
        if sender_isolated && target.group_id != sender_group_id {
            continue;
        }
        if target.group_isolated && target.group_id != sender_group_id {
            continue;
        }
        let Some(position) = &target.position else {
            continue;
        };
        let distance = sender_pos.distance_to(position);
        if distance <= policy.proximity_distance {
            recipients.push(Recipient {
                client_id: target.client_id,
                distance,
                max_range: policy.proximity_distance,
                mode: RouteMode::Normal,
            });
        }
    }

    recipients
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupSettings;
    use chrono::Utc;

    fn pos(world: &str, x: f64) -> PlayerPosition {
        PlayerPosition {
            player_id: Uuid::new_v4(),
            username: "p".into(),
            x,
            y: 0.0,
            z: 0.0,
            yaw: 0.0,
            pitch: 0.0,
            world_id: world.into(),
            captured_at: Utc::now(),
        }
    }

    fn target(id: Uuid, x: f64) -> RouteTarget {
        RouteTarget {
            client_id: id,
            position: Some(pos("overworld", x)),
            group_id: None,
            group_isolated: false,
        }
    }

    fn group(members: &[Uuid], range: f64, isolated: bool) -> GroupSnapshot {
        GroupSnapshot {
            id: Uuid::new_v4(),
            name: "g".into(),
            is_permanent: false,
            is_isolated: isolated,
            creator_id: members.first().copied(),
            members: members.to_vec(),
            settings: GroupSettings {
                default_volume: 100,
                proximity_range: range,
                allow_invites: true,
                max_members: 16,
            },
            has_password: false,
            created_at: Utc::now(),
        }
    }

    fn policy() -> RoutePolicy {
        RoutePolicy {
            group_global_voice: false,
            group_spatial_audio: false,
            proximity_distance: 48.0,
        }
    }

    #[test]
    fn proximity_boundary_is_inclusive() {
        let sender = Uuid::new_v4();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        let targets = vec![target(near, 48.0), target(far, 48.001)];

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), None, &targets, &policy());
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].client_id, near);
        assert_eq!(recipients[0].mode, RouteMode::Normal);
    }

    #[test]
    fn cross_world_targets_are_never_routed() {
        let sender = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut t = target(other, 1.0);
        t.position.as_mut().unwrap().world_id = "nether".into();

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), None, &[t], &policy());
        assert!(recipients.is_empty());
    }

    #[test]
    fn legacy_group_routes_by_group_range() {
        let sender = Uuid::new_v4();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        let g = group(&[sender, near, far], 30.0, false);
        let targets = vec![target(near, 10.0), target(far, 31.0)];

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), Some(&g), &targets, &policy());
        // near: group NORMAL at group range; far: outside group range but
        // inside server proximity range.
        assert_eq!(recipients.len(), 2);
        let near_r = recipients.iter().find(|r| r.client_id == near).unwrap();
        assert_eq!(near_r.mode, RouteMode::Normal);
        assert!((near_r.max_range - 30.0).abs() < f64::EPSILON);
        let far_r = recipients.iter().find(|r| r.client_id == far).unwrap();
        assert!((far_r.max_range - 48.0).abs() < f64::EPSILON);
    }

    #[test]
    fn global_voice_reaches_any_distance() {
        let sender = Uuid::new_v4();
        let member = Uuid::new_v4();
        let g = group(&[sender, member], 30.0, false);
        let targets = vec![target(member, 10_000.0)];
        let policy = RoutePolicy {
            group_global_voice: true,
            ..policy()
        };

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), Some(&g), &targets, &policy);
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].mode, RouteMode::FullVolume);
    }

    #[test]
    fn spatial_group_audio_uses_min_volume_inside_range() {
        let sender = Uuid::new_v4();
        let near = Uuid::new_v4();
        let far = Uuid::new_v4();
        let g = group(&[sender, near, far], 30.0, false);
        let targets = vec![target(near, 20.0), target(far, 500.0)];
        let policy = RoutePolicy {
            group_global_voice: true,
            group_spatial_audio: true,
            ..policy()
        };

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), Some(&g), &targets, &policy);
        let near_r = recipients.iter().find(|r| r.client_id == near).unwrap();
        let far_r = recipients.iter().find(|r| r.client_id == far).unwrap();
        assert_eq!(near_r.mode, RouteMode::MinVolume);
        assert_eq!(far_r.mode, RouteMode::FullVolume);
    }

    #[test]
    fn isolated_group_blocks_outsiders() {
        let sender = Uuid::new_v4();
        let member = Uuid::new_v4();
        let outsider = Uuid::new_v4();
        let g = group(&[sender, member], 30.0, true);
        let mut member_t = target(member, 5.0);
        member_t.group_id = Some(g.id);
        member_t.group_isolated = true;
        let targets = vec![member_t, target(outsider, 5.0)];
        let policy = RoutePolicy {
            group_global_voice: true,
            ..policy()
        };

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), Some(&g), &targets, &policy);
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].client_id, member);
    }

    #[test]
    fn members_of_other_isolated_groups_are_excluded() {
        let sender = Uuid::new_v4();
        let cloistered = Uuid::new_v4();
        let mut t = target(cloistered, 5.0);
        t.group_id = Some(Uuid::new_v4());
        t.group_isolated = true;

        let recipients =
            compute_recipients(sender, &pos("overworld", 0.0), None, &[t], &policy());
        assert!(recipients.is_empty());
    }

    #[test]
    fn group_members_are_not_double_targeted() {
        let sender = Uuid::new_v4();
        let member = Uuid::new_v4();
        let g = group(&[sender, member], 30.0, false);
        let mut member_t = target(member, 5.0);
        member_t.group_id = Some(g.id);

        let recipients = compute_recipients(
            sender,
            &pos("overworld", 0.0),
            Some(&g),
            &[member_t],
            &policy(),
        );
        assert_eq!(recipients.len(), 1);
    }
}
