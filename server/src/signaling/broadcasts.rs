//! Broadcast helpers and the group-event fan-out task.
//!
//! Group-scoped messages go to every member of the relevant group;
//! server-wide messages go to every live session. The group model's event
//! stream drives the broadcasts that are not direct replies, which keeps
//! their order identical to the order of the operations that caused them.

use std::sync::atomic::Ordering;

use gv_protocol::messages::{GroupInfo, GroupMemberInfo, PlayerInfo};
use gv_protocol::ServerMessage;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::group::{GroupEvent, GroupSnapshot};
use crate::state::AppState;

/// Send to every live session.
pub fn broadcast_all(state: &AppState, message: &ServerMessage) {
    for session in state.sessions.all() {
        session.send(message.clone());
    }
}

/// Send to every member of a group, optionally excluding one player.
pub fn broadcast_group(
    state: &AppState,
    group_id: Uuid,
    message: &ServerMessage,
    exclude: Option<Uuid>,
) {
    let Ok(members) = state.groups.get_members(group_id) else {
        return;
    };
    for member in members {
        if Some(member) == exclude {
            continue;
        }
        if let Some(session) = state.sessions.get(member) {
            session.send(message.clone());
        }
    }
}

/// The current `player_list`, excluding pending sessions.
pub fn player_list_message(state: &AppState) -> ServerMessage {
    let mut players: Vec<PlayerInfo> = state
        .sessions
        .all()
        .into_iter()
        .filter(|s| !s.is_pending())
        .filter_map(|s| {
            let client_id = state.ids.obfuscate(s.client_id).ok()?;
            Some(PlayerInfo {
                client_id,
                username: s.username.clone(),
                is_muted: s.is_muted.load(Ordering::Relaxed),
                is_speaking: s.is_speaking.load(Ordering::Relaxed),
                group_id: state.groups.get_player_group(s.client_id).map(|g| g.id),
            })
        })
        .collect();
    players.sort_by(|a, b| a.username.cmp(&b.username));
    ServerMessage::PlayerList { players }
}

/// The current `group_list`.
pub fn group_list_message(state: &AppState) -> ServerMessage {
    let groups = state
        .groups
        .list_groups()
        .into_iter()
        .map(|g| group_info(state, &g))
        .collect();
    ServerMessage::GroupList { groups }
}

pub fn group_info(state: &AppState, group: &GroupSnapshot) -> GroupInfo {
    GroupInfo {
        group_id: group.id,
        group_name: group.name.clone(),
        member_count: group.members.len(),
        max_members: group.settings.max_members,
        has_password: group.has_password,
        is_permanent: group.is_permanent,
        is_isolated: group.is_isolated,
        creator_client_id: group
            .creator_id
            .and_then(|id| state.ids.obfuscate(id).ok()),
    }
}

/// Member descriptors for `group_members_list` / `group_members_updated`.
pub fn member_infos(state: &AppState, group: &GroupSnapshot) -> Vec<GroupMemberInfo> {
    group
        .members
        .iter()
        .filter_map(|member| {
            let client_id = state.ids.obfuscate(*member).ok()?;
            let session = state.sessions.get(*member);
            Some(GroupMemberInfo {
                client_id,
                username: session
                    .as_ref()
                    .map_or_else(String::new, |s| s.username.clone()),
                is_creator: group.creator_id == Some(*member),
                is_muted: session
                    .as_ref()
                    .is_some_and(|s| s.is_muted.load(Ordering::Relaxed)),
                is_speaking: session
                    .as_ref()
                    .is_some_and(|s| s.is_speaking.load(Ordering::Relaxed)),
            })
        })
        .collect()
}

/// Consume the group model's event stream and fan the changes out.
pub fn spawn_group_event_task(state: AppState) -> JoinHandle<()> {
    let mut rx = state.groups.subscribe();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                GroupEvent::GroupCreated { group } => {
                    let message = ServerMessage::GroupCreated {
                        group_id: group.id,
                        group_name: group.name.clone(),
                        member_count: group.members.len(),
                        creator_client_id: group
                            .creator_id
                            .and_then(|id| state.ids.obfuscate(id).ok())
                            .unwrap_or_default(),
                        is_permanent: group.is_permanent,
                        is_isolated: group.is_isolated,
                    };
                    broadcast_all(&state, &message);
                    broadcast_all(&state, &group_list_message(&state));
                }
                GroupEvent::GroupDeleted { group_id, name } => {
                    debug!(group_id = %group_id, name = %name, "Group removed");
                    broadcast_all(&state, &group_list_message(&state));
                }
                GroupEvent::PlayerJoinedGroup { group_id, .. }
                | GroupEvent::PlayerLeftGroup { group_id, .. } => {
                    if let Some(group) = state.groups.get_group(group_id) {
                        let message = ServerMessage::GroupMembersUpdated {
                            group_id,
                            members: member_infos(&state, &group),
                        };
                        broadcast_group(&state, group_id, &message, None);
                    }
                    broadcast_all(&state, &player_list_message(&state));
                }
            }
        }
        debug!("Group event task stopped");
    })
}
