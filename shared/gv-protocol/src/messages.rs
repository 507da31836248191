//! Signaling protocol messages.
//!
//! Every WebSocket frame is a JSON envelope `{"type": <string>, "data":
//! <object>}`. The `type` strings are snake_case; payload fields are
//! camelCase. Unknown fields inside payloads are tolerated so that newer
//! clients can talk to older servers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audio::AudioCodec;

/// Client-to-server messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message after connecting: exchange an auth code for a session.
    #[serde(rename_all = "camelCase")]
    Authenticate {
        username: String,
        auth_code: String,
        #[serde(default)]
        audio_codecs: Option<Vec<String>>,
        #[serde(default)]
        preferred_audio_codec: Option<String>,
    },
    /// Recover a recently disconnected session.
    #[serde(rename_all = "camelCase")]
    Resume {
        session_id: Uuid,
        resume_token: String,
        #[serde(default)]
        audio_codecs: Option<Vec<String>>,
    },
    /// Liveness probe; the server echoes the timestamp back.
    #[serde(rename_all = "camelCase")]
    Heartbeat { timestamp: i64 },
    /// Clean shutdown of the connection.
    Disconnect {},
    /// Application-level ping.
    Ping {},
    #[serde(rename_all = "camelCase")]
    CreateGroup {
        group_name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        permanent: Option<bool>,
        #[serde(default)]
        isolated: Option<bool>,
        #[serde(default)]
        settings: Option<GroupSettingsData>,
    },
    #[serde(rename_all = "camelCase")]
    JoinGroup {
        group_id: Uuid,
        #[serde(default)]
        password: Option<String>,
    },
    LeaveGroup {},
    ListGroups {},
    ListPlayers {},
    /// Members of the given group, or of the caller's group when omitted.
    #[serde(rename_all = "camelCase")]
    GetGroupMembers {
        #[serde(default)]
        group_id: Option<Uuid>,
    },
    /// Set or clear (null) the group password. Creator only.
    #[serde(rename_all = "camelCase")]
    UpdateGroupPassword {
        group_id: Uuid,
        #[serde(default)]
        password: Option<String>,
    },
    /// Toggle the permanent flag. Admin only.
    #[serde(rename_all = "camelCase")]
    SetGroupPermanent { group_id: Uuid, permanent: bool },
    #[serde(rename_all = "camelCase")]
    UserSpeaking { is_speaking: bool },
    #[serde(rename_all = "camelCase")]
    UserMute { is_muted: bool },
    /// WebRTC offer SDP.
    Offer { sdp: String },
    /// Trickle ICE candidate, or `complete: true` for end-of-candidates.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        #[serde(default)]
        candidate: Option<String>,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_m_line_index: Option<u16>,
        #[serde(default)]
        complete: Option<bool>,
    },
    /// Ask the server to bring up DTLS/SCTP and accept data channels.
    StartDatachannel {},
}

/// Group settings as they appear on the wire. All fields optional; the
/// server clamps and fills defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSettingsData {
    #[serde(default)]
    pub max_members: Option<u32>,
    #[serde(default)]
    pub proximity_range: Option<f64>,
    #[serde(default)]
    pub default_volume: Option<u32>,
    #[serde(default)]
    pub allow_invites: Option<bool>,
}

/// One group as reported in `group_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub group_id: Uuid,
    pub group_name: String,
    pub member_count: usize,
    pub max_members: u32,
    pub has_password: bool,
    pub is_permanent: bool,
    pub is_isolated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creator_client_id: Option<String>,
}

/// One player as reported in `player_list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub client_id: String,
    pub username: String,
    pub is_muted: bool,
    pub is_speaking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<Uuid>,
}

/// One member as reported in `group_members_list` / `group_members_updated`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMemberInfo {
    pub client_id: String,
    pub username: String,
    pub is_creator: bool,
    pub is_muted: bool,
    pub is_speaking: bool,
}

/// A player position entry in `position_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionEntry {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
    pub world_id: String,
    /// Distance from the listener, rounded to one decimal. Absent on the
    /// listener's own entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

/// Server-to-client messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent immediately after the WebSocket upgrade.
    #[serde(rename_all = "camelCase")]
    Hello {
        heartbeat_interval_ms: u64,
        resume_window_ms: u64,
        proximity_radar: bool,
        proximity_radar_speaking_only: bool,
        group_spatial_audio: bool,
        default_audio_codec: AudioCodec,
    },
    #[serde(rename_all = "camelCase")]
    AuthSuccess {
        client_id: String,
        session_id: Uuid,
        resume_token: String,
        is_admin: bool,
        stun_servers: Vec<String>,
        heartbeat_interval_ms: u64,
        resume_window_ms: u64,
        audio_codec: AudioCodec,
        pending_game_session: bool,
    },
    #[serde(rename_all = "camelCase")]
    Resumed {
        client_id: String,
        session_id: Uuid,
        resume_token: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
        audio_codec: AudioCodec,
    },
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    HeartbeatAck { timestamp: i64 },
    Pong {},
    /// The in-game session appeared; the client is fully live now.
    GameSessionReady {},
    #[serde(rename_all = "camelCase")]
    PendingGameSession {
        message: String,
        timeout_seconds: u64,
    },
    #[serde(rename_all = "camelCase")]
    GroupCreated {
        group_id: Uuid,
        group_name: String,
        member_count: usize,
        creator_client_id: String,
        is_permanent: bool,
        is_isolated: bool,
    },
    #[serde(rename_all = "camelCase")]
    GroupJoined {
        group_id: Uuid,
        group_name: String,
        members: Vec<GroupMemberInfo>,
    },
    #[serde(rename_all = "camelCase")]
    GroupLeft {
        group_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        new_creator_client_id: Option<String>,
    },
    GroupList { groups: Vec<GroupInfo> },
    PlayerList { players: Vec<PlayerInfo> },
    #[serde(rename_all = "camelCase")]
    GroupMembersList {
        group_id: Uuid,
        members: Vec<GroupMemberInfo>,
    },
    #[serde(rename_all = "camelCase")]
    GroupMembersUpdated {
        group_id: Uuid,
        members: Vec<GroupMemberInfo>,
    },
    #[serde(rename_all = "camelCase")]
    GroupPasswordUpdated { group_id: Uuid, has_password: bool },
    #[serde(rename_all = "camelCase")]
    GroupPermanentUpdated { group_id: Uuid, is_permanent: bool },
    #[serde(rename_all = "camelCase")]
    UserSpeakingStatus { client_id: String, is_speaking: bool },
    #[serde(rename_all = "camelCase")]
    UserMuteStatus { client_id: String, is_muted: bool },
    /// WebRTC answer SDP.
    Answer { sdp: String },
    /// Trickle ICE candidate, or `complete: true` for end-of-gathering.
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        #[serde(default)]
        candidate: Option<String>,
        #[serde(default)]
        sdp_mid: Option<String>,
        #[serde(default)]
        sdp_m_line_index: Option<u16>,
        #[serde(default)]
        complete: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    PositionUpdate {
        listener: PositionEntry,
        positions: Vec<PositionEntry>,
        timestamp: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_shape() {
        let msg = ServerMessage::HeartbeatAck { timestamp: 42 };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "heartbeat_ack");
        assert_eq!(json["data"]["timestamp"], 42);
    }

    #[test]
    fn authenticate_round_trip() {
        let raw = r#"{"type":"authenticate","data":{"username":"alice","authCode":"ABC12345","audioCodecs":["opus","pcm"]}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::Authenticate {
                username,
                auth_code,
                audio_codecs,
                preferred_audio_codec,
            } => {
                assert_eq!(username, "alice");
                assert_eq!(auth_code, "ABC12345");
                assert_eq!(audio_codecs.as_deref(), Some(&["opus".to_string(), "pcm".to_string()][..]));
                assert!(preferred_audio_codec.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_payload_fields_are_tolerated() {
        let raw = r#"{"type":"heartbeat","data":{"timestamp":7,"extra":"ignored"}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::Heartbeat { timestamp: 7 }));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let raw = r#"{"type":"warp_drive","data":{}}"#;
        assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
    }

    #[test]
    fn empty_payload_messages() {
        let raw = r#"{"type":"ping","data":{}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, ClientMessage::Ping {}));
    }

    #[test]
    fn ice_complete_flag() {
        let raw = r#"{"type":"ice_candidate","data":{"complete":true}}"#;
        let msg: ClientMessage = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMessage::IceCandidate {
                candidate, complete, ..
            } => {
                assert!(candidate.is_none());
                assert_eq!(complete, Some(true));
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
