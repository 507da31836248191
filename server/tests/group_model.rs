//! Group model and identity mapping, exercised through the public API.

use gv_protocol::messages::GroupSettingsData;
use uuid::Uuid;

use gv_server::group::{ClientIdMap, GroupError, GroupEvent, GroupLimits, GroupManager};

fn manager() -> GroupManager {
    GroupManager::new(GroupLimits {
        max_name_length: 24,
        default_proximity_range: 30.0,
        max_voice_distance: 128.0,
        default_max_members: 16,
        default_isolated: false,
    })
}

#[test]
fn third_joiner_of_a_two_seat_group_fails_with_group_full() {
    let groups = manager();
    let creator = Uuid::new_v4();
    let settings = GroupSettingsData {
        max_members: Some(2),
        ..GroupSettingsData::default()
    };
    let group = groups
        .create_group("duo", false, creator, &settings, None, None)
        .unwrap();
    groups.join_group(Uuid::new_v4(), group.id).unwrap();

    let err = groups.join_group(Uuid::new_v4(), group.id).unwrap_err();
    assert_eq!(err, GroupError::GroupFull { max_members: 2 });
    assert_eq!(err.code(), Some("group_full"));
}

#[test]
fn membership_is_exclusive() {
    let groups = manager();
    let player = Uuid::new_v4();
    let settings = GroupSettingsData::default();

    let a = groups
        .create_group("alpha", true, Uuid::new_v4(), &settings, None, None)
        .unwrap();
    let b = groups
        .create_group("bravo", true, Uuid::new_v4(), &settings, None, None)
        .unwrap();

    groups.join_group(player, a.id).unwrap();
    groups.join_group(player, b.id).unwrap();

    assert!(!groups.get_group(a.id).unwrap().members.contains(&player));
    assert!(groups.get_group(b.id).unwrap().members.contains(&player));
    assert_eq!(groups.get_player_group(player).unwrap().id, b.id);
}

#[test]
fn creator_leave_promotes_a_member_and_disband_follows_last_leave() {
    let groups = manager();
    let creator = Uuid::new_v4();
    let member = Uuid::new_v4();
    let group = groups
        .create_group("raid", false, creator, &GroupSettingsData::default(), None, None)
        .unwrap();
    groups.join_group(member, group.id).unwrap();

    let outcome = groups.leave_group(creator).unwrap();
    assert_eq!(outcome.new_creator, Some(member));
    assert!(!outcome.disbanded);

    let outcome = groups.leave_group(member).unwrap();
    assert!(outcome.disbanded);
    assert!(groups.get_group(group.id).is_none());
    assert!(groups.list_groups().is_empty());
}

#[test]
fn disconnect_equals_leave() {
    let groups = manager();
    let creator = Uuid::new_v4();
    let group = groups
        .create_group("solo", false, creator, &GroupSettingsData::default(), None, None)
        .unwrap();

    let outcome = groups.handle_player_disconnect(creator).unwrap();
    assert!(outcome.disbanded);
    assert!(groups.get_group(group.id).is_none());

    // Disconnecting a player with no group is a quiet no-op.
    assert!(groups.handle_player_disconnect(Uuid::new_v4()).is_none());
}

#[test]
fn create_then_drain_is_observably_a_no_op() {
    let groups = manager();
    let mut events = groups.subscribe();
    let creator = Uuid::new_v4();

    let before = groups.list_groups().len();
    groups
        .create_group("fleeting", false, creator, &GroupSettingsData::default(), None, None)
        .unwrap();
    groups.leave_group(creator).unwrap();
    assert_eq!(groups.list_groups().len(), before);

    // Only the listener saw it happen.
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(match event {
            GroupEvent::GroupCreated { .. } => "created",
            GroupEvent::PlayerJoinedGroup { .. } => "joined",
            GroupEvent::PlayerLeftGroup { .. } => "left",
            GroupEvent::GroupDeleted { .. } => "deleted",
        });
    }
    assert_eq!(kinds, vec!["created", "joined", "left", "deleted"]);
}

#[test]
fn id_map_round_trips_through_group_flows() {
    let groups = manager();
    let ids = ClientIdMap::new();
    let creator = Uuid::new_v4();
    let group = groups
        .create_group("mapped", false, creator, &GroupSettingsData::default(), None, None)
        .unwrap();

    let token = ids.obfuscate(creator).unwrap();
    assert_eq!(ids.resolve(&token), Some(creator));
    assert_eq!(
        groups.get_group(group.id).unwrap().creator_id,
        ids.resolve(&token)
    );

    // Cleanup drops the token with the session, not with the group.
    groups.leave_group(creator).unwrap();
    assert_eq!(ids.resolve(&token), Some(creator));
    ids.remove(creator);
    assert_eq!(ids.resolve(&token), None);
}

#[test]
fn settings_update_never_undercuts_current_membership() {
    let groups = manager();
    let creator = Uuid::new_v4();
    let group = groups
        .create_group("packed", false, creator, &GroupSettingsData::default(), None, None)
        .unwrap();
    groups.join_group(Uuid::new_v4(), group.id).unwrap();
    groups.join_group(Uuid::new_v4(), group.id).unwrap();

    let shrunk = GroupSettingsData {
        max_members: Some(2),
        ..GroupSettingsData::default()
    };
    let updated = groups.update_settings(group.id, creator, &shrunk).unwrap();
    assert_eq!(updated.settings.max_members, 3);
    assert!(updated.members.len() as u32 <= updated.settings.max_members);
}
