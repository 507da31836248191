//! WebSocket connection handling and message dispatch.
//!
//! One task reads the socket and dispatches messages; a second forwards
//! queued server messages back out and executes close commands. All session
//! state transitions (authenticate, resume, pending gate, cleanup) live
//! here.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use gv_protocol::{
    AudioCodec, ClientMessage, ServerMessage, CLOSE_PENDING_GAME_TIMEOUT,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::state::AppState;

use super::broadcasts::{
    broadcast_all, broadcast_group, group_list_message, member_infos, player_list_message,
};
use super::error::SignalError;
use super::session::{new_resume_token, ClientSession, CloseCommand, ResumableSession};

/// Outbound queue depth per connection.
const OUTBOUND_QUEUE_DEPTH: usize = 64;

/// Handle one WebSocket connection for its whole life.
pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE_DEPTH);
    let (close_tx, mut close_rx) = mpsc::channel::<CloseCommand>(4);
    // Flipped once the close frame is on the wire, so the read loop does
    // not wait out a dead peer's TCP timeout.
    let (closed_tx, mut closed_rx) = tokio::sync::watch::channel(false);

    // Forward queued messages to the socket; a close command wins the race.
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                message = msg_rx.recv() => {
                    let Some(message) = message else { break };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize message");
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                command = close_rx.recv() => {
                    if let Some(command) = command {
                        let _ = ws_sender
                            .send(Message::Close(Some(CloseFrame {
                                code: command.code,
                                reason: command.reason.into(),
                            })))
                            .await;
                    }
                    let _ = closed_tx.send(true);
                    break;
                }
            }
        }
    });

    let mut conn = Connection {
        state,
        connection_id: Uuid::new_v4(),
        msg_tx,
        close_tx,
        session: None,
    };

    conn.send(conn.hello_message());

    loop {
        tokio::select! {
            message = ws_receiver.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => conn.handle_text(text.as_str()).await,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "WebSocket error");
                        break;
                    }
                }
            }
            _ = closed_rx.changed() => break,
        }
    }

    conn.cleanup().await;
    writer.abort();
}

struct Connection {
    state: AppState,
    connection_id: Uuid,
    msg_tx: mpsc::Sender<ServerMessage>,
    close_tx: mpsc::Sender<CloseCommand>,
    session: Option<Arc<ClientSession>>,
}

impl Connection {
    fn send(&self, message: ServerMessage) {
        if self.msg_tx.try_send(message).is_err() {
            warn!("Outbound queue full, dropping message");
        }
    }

    fn send_error(&self, error: &SignalError) {
        self.send(ServerMessage::Error {
            message: error.to_string(),
            code: error.code().map(String::from),
        });
    }

    fn hello_message(&self) -> ServerMessage {
        let config = &self.state.config;
        ServerMessage::Hello {
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            resume_window_ms: config.resume_window_ms,
            proximity_radar: config.proximity_radar_enabled,
            proximity_radar_speaking_only: config.proximity_radar_speaking_only_enabled,
            group_spatial_audio: config.group_spatial_audio,
            default_audio_codec: config.default_audio_codec(),
        }
    }

    async fn handle_text(&mut self, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                self.send_error(&SignalError::Protocol(e.to_string()));
                return;
            }
        };

        // While the in-game session is missing, only the lifecycle messages
        // pass; everything else is told to wait.
        if let Some(session) = &self.session {
            let gated = !matches!(
                message,
                ClientMessage::Authenticate { .. }
                    | ClientMessage::Disconnect {}
                    | ClientMessage::Heartbeat { .. }
                    | ClientMessage::Ping {}
            );
            if session.is_pending() && gated {
                self.send(ServerMessage::PendingGameSession {
                    message: "Waiting for the in-game session".into(),
                    timeout_seconds: session.pending_remaining_secs(),
                });
                return;
            }
        }

        if let Err(e) = self.dispatch(message).await {
            self.send_error(&e);
        }
    }

    async fn dispatch(&mut self, message: ClientMessage) -> Result<(), SignalError> {
        match message {
            ClientMessage::Authenticate {
                username,
                auth_code,
                audio_codecs,
                preferred_audio_codec,
            } => {
                self.handle_authenticate(
                    username,
                    &auth_code,
                    audio_codecs.as_deref(),
                    preferred_audio_codec.as_deref(),
                )
            }
            ClientMessage::Resume {
                session_id,
                resume_token,
                ..
            } => self.handle_resume(session_id, &resume_token),
            ClientMessage::Heartbeat { timestamp } => {
                if let Some(session) = &self.session {
                    session.touch_heartbeat();
                }
                self.send(ServerMessage::HeartbeatAck { timestamp });
                Ok(())
            }
            ClientMessage::Ping {} => {
                self.send(ServerMessage::Pong {});
                Ok(())
            }
            ClientMessage::Disconnect {} => {
                let _ = self.close_tx.try_send(CloseCommand {
                    code: 1000,
                    reason: "Client disconnect".into(),
                });
                Ok(())
            }
            ClientMessage::CreateGroup {
                group_name,
                password,
                permanent,
                isolated,
                settings,
            } => self.handle_create_group(
                &group_name,
                password.as_deref(),
                permanent.unwrap_or(false),
                isolated,
                settings.unwrap_or_default(),
            ),
            ClientMessage::JoinGroup { group_id, password } => {
                self.handle_join_group(group_id, password.as_deref())
            }
            ClientMessage::LeaveGroup {} => self.handle_leave_group(),
            ClientMessage::ListGroups {} => {
                self.require_session()?;
                self.send(group_list_message(&self.state));
                Ok(())
            }
            ClientMessage::ListPlayers {} => {
                self.require_session()?;
                self.send(player_list_message(&self.state));
                Ok(())
            }
            ClientMessage::GetGroupMembers { group_id } => self.handle_get_group_members(group_id),
            ClientMessage::UpdateGroupPassword { group_id, password } => {
                let session = self.require_session()?;
                let has_password = self.state.groups.update_password(
                    group_id,
                    session.client_id,
                    password.as_deref(),
                )?;
                self.send(ServerMessage::GroupPasswordUpdated {
                    group_id,
                    has_password,
                });
                Ok(())
            }
            ClientMessage::SetGroupPermanent {
                group_id,
                permanent,
            } => {
                let session = self.require_session()?;
                if !session.is_admin {
                    return Err(SignalError::NotAuthorized);
                }
                let group = self.state.groups.set_permanent(group_id, permanent)?;
                self.send(ServerMessage::GroupPermanentUpdated {
                    group_id: group.id,
                    is_permanent: group.is_permanent,
                });
                broadcast_all(&self.state, &group_list_message(&self.state));
                Ok(())
            }
            ClientMessage::UserSpeaking { is_speaking } => self.handle_speaking(is_speaking),
            ClientMessage::UserMute { is_muted } => self.handle_mute(is_muted),
            ClientMessage::Offer { sdp } => self.handle_offer(sdp).await,
            ClientMessage::IceCandidate {
                candidate,
                complete,
                ..
            } => self.handle_ice_candidate(candidate, complete),
            ClientMessage::StartDatachannel {} => {
                let session = self.require_session()?;
                self.state.peers.start_datachannel(session.client_id);
                Ok(())
            }
        }
    }

    fn require_session(&self) -> Result<Arc<ClientSession>, SignalError> {
        self.session.clone().ok_or(SignalError::NotAuthenticated)
    }

    fn handle_authenticate(
        &mut self,
        username: String,
        auth_code: &str,
        audio_codecs: Option<&[String]>,
        _preferred: Option<&str>,
    ) -> Result<(), SignalError> {
        if self.session.is_some() {
            return Err(SignalError::Protocol("already authenticated".into()));
        }

        let player_id = self
            .state
            .auth
            .validate(&username, auth_code)
            .ok_or(SignalError::AuthFailed)?;
        let codec = negotiate_codec(&self.state.config, audio_codecs)?;

        // A second login replaces the first; the old socket is told to go.
        if let Some(old) = self.state.sessions.get(player_id) {
            info!(client_id = %player_id, "Replacing existing session");
            old.close(1000, "Replaced by a newer session");
            self.state.peers.remove(player_id);
        }

        let is_admin = self
            .state
            .config
            .admin_usernames
            .iter()
            .any(|admin| admin.eq_ignore_ascii_case(&username));
        let resume_token = new_resume_token();
        let session = Arc::new(ClientSession::new(
            player_id,
            username.clone(),
            Uuid::new_v4(),
            self.connection_id,
            codec,
            is_admin,
            resume_token.clone(),
            self.msg_tx.clone(),
            self.close_tx.clone(),
        ));

        let online = self.state.presence.is_player_online(player_id);
        if !online {
            let timeout = Duration::from_secs(self.state.config.pending_game_join_timeout_seconds);
            session.pending_game.store(true, Ordering::Relaxed);
            *session.pending_deadline.write().expect("pending lock") =
                Some(Instant::now() + timeout);
            spawn_pending_timer(self.state.clone(), player_id, self.connection_id, timeout);
        }

        self.state.sessions.insert(session.clone());
        self.session = Some(session.clone());

        let client_token = self.state.ids.obfuscate(player_id)?;
        let config = &self.state.config;
        session.send(ServerMessage::AuthSuccess {
            client_id: client_token,
            session_id: session.session_id,
            resume_token,
            is_admin,
            stun_servers: config.stun_servers.clone(),
            heartbeat_interval_ms: config.heartbeat_interval_ms,
            resume_window_ms: config.resume_window_ms,
            audio_codec: codec,
            pending_game_session: !online,
        });

        if online {
            broadcast_all(&self.state, &player_list_message(&self.state));
        }

        info!(
            client_id = %player_id,
            username = %username,
            codec = %codec,
            pending = !online,
            "Client authenticated"
        );
        Ok(())
    }

    fn handle_resume(&mut self, session_id: Uuid, resume_token: &str) -> Result<(), SignalError> {
        if self.session.is_some() {
            return Err(SignalError::Protocol("already authenticated".into()));
        }

        let record = self
            .state
            .sessions
            .take_for_resume(session_id, resume_token)
            .ok_or(SignalError::ResumeFailed)?;

        let new_token = new_resume_token();
        let session = Arc::new(ClientSession::new(
            record.client_id,
            record.username,
            record.session_id,
            self.connection_id,
            record.codec,
            record.is_admin,
            new_token.clone(),
            self.msg_tx.clone(),
            self.close_tx.clone(),
        ));
        self.state.sessions.insert(session.clone());
        self.session = Some(session.clone());

        // Rejoin the previous group when it still exists.
        let mut group_id = None;
        if let Some(gid) = record.last_group_id {
            if self.state.groups.join_group(record.client_id, gid).is_ok() {
                group_id = Some(gid);
            }
        }

        let client_token = self.state.ids.obfuscate(record.client_id)?;
        session.send(ServerMessage::Resumed {
            client_id: client_token,
            session_id: record.session_id,
            resume_token: new_token,
            group_id,
            audio_codec: record.codec,
        });
        broadcast_all(&self.state, &player_list_message(&self.state));

        info!(client_id = %record.client_id, "Session resumed");
        Ok(())
    }

    fn handle_create_group(
        &mut self,
        name: &str,
        password: Option<&str>,
        permanent: bool,
        isolated: Option<bool>,
        settings: gv_protocol::messages::GroupSettingsData,
    ) -> Result<(), SignalError> {
        let session = self.require_session()?;
        self.state.op_limiter.check(session.client_id)?;
        if permanent && !session.is_admin {
            return Err(SignalError::NotAuthorized);
        }
        self.state.groups.create_group(
            name,
            permanent,
            session.client_id,
            &settings,
            isolated,
            password,
        )?;
        // group_created and the membership updates fan out via the group
        // event stream.
        Ok(())
    }

    fn handle_join_group(
        &mut self,
        group_id: Uuid,
        password: Option<&str>,
    ) -> Result<(), SignalError> {
        let session = self.require_session()?;
        self.state.op_limiter.check(session.client_id)?;
        self.state.groups.verify_password(group_id, password)?;
        let group = self.state.groups.join_group(session.client_id, group_id)?;
        self.send(ServerMessage::GroupJoined {
            group_id: group.id,
            group_name: group.name.clone(),
            members: member_infos(&self.state, &group),
        });
        Ok(())
    }

    fn handle_leave_group(&mut self) -> Result<(), SignalError> {
        let session = self.require_session()?;
        let outcome = self.state.groups.leave_group(session.client_id)?;
        self.send(ServerMessage::GroupLeft {
            group_id: outcome.group_id,
            new_creator_client_id: outcome
                .new_creator
                .and_then(|id| self.state.ids.obfuscate(id).ok()),
        });
        Ok(())
    }

    fn handle_get_group_members(&mut self, group_id: Option<Uuid>) -> Result<(), SignalError> {
        let session = self.require_session()?;
        let group = match group_id {
            Some(id) => self
                .state
                .groups
                .get_group(id)
                .ok_or(crate::group::GroupError::GroupNotFound(id))?,
            None => self
                .state
                .groups
                .get_player_group(session.client_id)
                .ok_or(crate::group::GroupError::NotInGroup(session.client_id))?,
        };
        self.send(ServerMessage::GroupMembersList {
            group_id: group.id,
            members: member_infos(&self.state, &group),
        });
        Ok(())
    }

    fn handle_speaking(&mut self, is_speaking: bool) -> Result<(), SignalError> {
        let session = self.require_session()?;
        session.is_speaking.store(is_speaking, Ordering::Relaxed);
        if let Some(group) = self.state.groups.get_player_group(session.client_id) {
            let message = ServerMessage::UserSpeakingStatus {
                client_id: self.state.ids.obfuscate(session.client_id)?,
                is_speaking,
            };
            // The speaker already knows; do not echo it back.
            broadcast_group(&self.state, group.id, &message, Some(session.client_id));
        }
        Ok(())
    }

    fn handle_mute(&mut self, is_muted: bool) -> Result<(), SignalError> {
        let session = self.require_session()?;
        session.is_muted.store(is_muted, Ordering::Relaxed);
        if let Some(group) = self.state.groups.get_player_group(session.client_id) {
            let message = ServerMessage::UserMuteStatus {
                client_id: self.state.ids.obfuscate(session.client_id)?,
                is_muted,
            };
            // Mute state echoes to everyone, the sender included.
            broadcast_group(&self.state, group.id, &message, None);
        }
        Ok(())
    }

    async fn handle_offer(&mut self, sdp: String) -> Result<(), SignalError> {
        let session = self.require_session()?;
        let answer = self
            .state
            .peers
            .handle_offer(session.client_id, sdp, self.msg_tx.clone())
            .await?;
        self.send(ServerMessage::Answer { sdp: answer });
        Ok(())
    }

    fn handle_ice_candidate(
        &mut self,
        candidate: Option<String>,
        complete: Option<bool>,
    ) -> Result<(), SignalError> {
        let session = self.require_session()?;
        if complete == Some(true) {
            self.state.peers.end_of_candidates(session.client_id);
            return Ok(());
        }
        let line = candidate
            .ok_or_else(|| SignalError::Protocol("candidate or complete required".into()))?;
        self.state.peers.add_candidate(session.client_id, line);
        Ok(())
    }

    /// Tear down everything this connection owned. Replaced connections
    /// find their session already re-owned and leave it alone.
    async fn cleanup(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        let Some(owned) = self
            .state
            .sessions
            .remove_connection(session.client_id, session.connection_id)
        else {
            debug!(client_id = %session.client_id, "Connection was replaced, skipping cleanup");
            return;
        };
        let client_id = owned.client_id;

        let last_group_id = self
            .state
            .groups
            .get_player_group(client_id)
            .map(|g| g.id);
        self.state.groups.handle_player_disconnect(client_id);
        self.state.peers.remove(client_id);

        if !self.state.presence.is_player_online(client_id) {
            self.state.positions.remove(client_id);
        }

        self.state.sessions.stash_resumable(ResumableSession {
            client_id,
            username: owned.username.clone(),
            session_id: owned.session_id,
            resume_token: owned.current_resume_token(),
            last_group_id,
            codec: owned.codec,
            is_admin: owned.is_admin,
            expires_at: Instant::now() + self.state.sessions.resume_window(),
        });

        broadcast_all(&self.state, &player_list_message(&self.state));
        info!(client_id = %client_id, "Client disconnected");
    }
}

/// Pick the session codec per the server's supported set.
fn negotiate_codec(
    config: &Config,
    offered: Option<&[String]>,
) -> Result<AudioCodec, SignalError> {
    if config.opus_data_channel_enabled {
        let lists_opus = offered
            .is_some_and(|codecs| codecs.iter().any(|c| c.eq_ignore_ascii_case("opus")));
        if lists_opus {
            Ok(AudioCodec::Opus)
        } else {
            Err(SignalError::CodecUnsupported)
        }
    } else {
        Ok(AudioCodec::Pcm)
    }
}

/// Close the connection if the in-game session never shows up.
fn spawn_pending_timer(
    state: AppState,
    client_id: Uuid,
    connection_id: Uuid,
    timeout: Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let Some(session) = state.sessions.get(client_id) else {
            return;
        };
        if session.connection_id != connection_id || !session.is_pending() {
            return;
        }
        warn!(client_id = %client_id, "Pending game session timed out");
        session.send(ServerMessage::Error {
            message: "No in-game session appeared in time".into(),
            code: None,
        });
        session.close(CLOSE_PENDING_GAME_TIMEOUT, "Pending game session not found");
    });
}
