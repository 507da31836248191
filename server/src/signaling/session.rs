//! Client sessions and the live/resumable session registries.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use gv_protocol::{AudioCodec, ServerMessage};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use crate::audio::{ClientDirectory, ClientView};

/// Request to close the WebSocket with a specific code.
#[derive(Debug, Clone)]
pub struct CloseCommand {
    pub code: u16,
    pub reason: String,
}

/// One authenticated WebSocket connection.
pub struct ClientSession {
    /// Equal to the real player id.
    pub client_id: Uuid,
    pub username: String,
    pub session_id: Uuid,
    /// Distinguishes this socket from a replacement for the same player.
    pub connection_id: Uuid,
    pub codec: AudioCodec,
    pub is_admin: bool,
    pub resume_token: RwLock<String>,
    pub last_heartbeat: RwLock<Instant>,
    pub is_muted: AtomicBool,
    pub is_speaking: AtomicBool,
    pub volume_percent: AtomicU32,
    pub pending_game: AtomicBool,
    pub pending_deadline: RwLock<Option<Instant>>,
    tx: mpsc::Sender<ServerMessage>,
    close_tx: mpsc::Sender<CloseCommand>,
}

impl ClientSession {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        client_id: Uuid,
        username: String,
        session_id: Uuid,
        connection_id: Uuid,
        codec: AudioCodec,
        is_admin: bool,
        resume_token: String,
        tx: mpsc::Sender<ServerMessage>,
        close_tx: mpsc::Sender<CloseCommand>,
    ) -> Self {
        Self {
            client_id,
            username,
            session_id,
            connection_id,
            codec,
            is_admin,
            resume_token: RwLock::new(resume_token),
            last_heartbeat: RwLock::new(Instant::now()),
            is_muted: AtomicBool::new(false),
            is_speaking: AtomicBool::new(false),
            volume_percent: AtomicU32::new(100),
            pending_game: AtomicBool::new(false),
            pending_deadline: RwLock::new(None),
            tx,
            close_tx,
        }
    }

    /// Queue a message for this client. Slow consumers lose frames rather
    /// than stalling the caller.
    pub fn send(&self, message: ServerMessage) {
        if self.tx.try_send(message).is_err() {
            warn!(client_id = %self.client_id, "Outbound queue full, dropping message");
        }
    }

    /// Ask the connection task to close the socket.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.close_tx.try_send(CloseCommand {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn touch_heartbeat(&self) {
        *self.last_heartbeat.write().expect("heartbeat lock") = Instant::now();
    }

    #[must_use]
    pub fn heartbeat_age(&self) -> Duration {
        self.last_heartbeat.read().expect("heartbeat lock").elapsed()
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending_game.load(Ordering::Relaxed)
    }

    /// Seconds left before the pending-game timeout fires.
    #[must_use]
    pub fn pending_remaining_secs(&self) -> u64 {
        self.pending_deadline
            .read()
            .expect("pending lock")
            .map_or(0, |deadline| {
                deadline.saturating_duration_since(Instant::now()).as_secs()
            })
    }

    #[must_use]
    pub fn current_resume_token(&self) -> String {
        self.resume_token.read().expect("token lock").clone()
    }
}

/// A recently disconnected session that may still be resumed.
#[derive(Debug, Clone)]
pub struct ResumableSession {
    pub client_id: Uuid,
    pub username: String,
    pub session_id: Uuid,
    pub resume_token: String,
    pub last_group_id: Option<Uuid>,
    pub codec: AudioCodec,
    pub is_admin: bool,
    pub expires_at: Instant,
}

/// Live and resumable session registries.
pub struct SessionManager {
    clients: DashMap<Uuid, Arc<ClientSession>>,
    resumable: DashMap<String, ResumableSession>,
    resume_window: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(resume_window: Duration) -> Self {
        Self {
            clients: DashMap::new(),
            resumable: DashMap::new(),
            resume_window,
        }
    }

    /// Install a session, returning the one it replaced, if any.
    pub fn insert(&self, session: Arc<ClientSession>) -> Option<Arc<ClientSession>> {
        self.clients.insert(session.client_id, session)
    }

    #[must_use]
    pub fn get(&self, client_id: Uuid) -> Option<Arc<ClientSession>> {
        self.clients.get(&client_id).map(|s| s.clone())
    }

    /// Remove a session, but only if it still belongs to `connection_id`;
    /// a replaced connection must not tear down its successor.
    pub fn remove_connection(
        &self,
        client_id: Uuid,
        connection_id: Uuid,
    ) -> Option<Arc<ClientSession>> {
        self.clients
            .remove_if(&client_id, |_, s| s.connection_id == connection_id)
            .map(|(_, s)| s)
    }

    #[must_use]
    pub fn is_live(&self, client_id: Uuid) -> bool {
        self.clients.contains_key(&client_id)
    }

    #[must_use]
    pub fn all(&self) -> Vec<Arc<ClientSession>> {
        self.clients.iter().map(|s| s.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Stash a resumable record for a disconnected session.
    pub fn stash_resumable(&self, record: ResumableSession) {
        self.resumable.insert(record.resume_token.clone(), record);
    }

    #[must_use]
    pub fn resume_window(&self) -> Duration {
        self.resume_window
    }

    /// Claim a resumable record. The record is removed only when every
    /// check passes; failed attempts leave it in place for the rightful
    /// owner.
    pub fn take_for_resume(
        &self,
        session_id: Uuid,
        resume_token: &str,
    ) -> Option<ResumableSession> {
        let matches = {
            let record = self.resumable.get(resume_token)?;
            record.session_id == session_id
                && record.expires_at > Instant::now()
                && !self.is_live(record.client_id)
        };
        if matches {
            self.resumable.remove(resume_token).map(|(_, r)| r)
        } else {
            None
        }
    }

    /// Drop expired resumable records, returning them for id cleanup.
    pub fn expire_resumables(&self) -> Vec<ResumableSession> {
        let now = Instant::now();
        let expired: Vec<String> = self
            .resumable
            .iter()
            .filter(|r| r.expires_at <= now)
            .map(|r| r.resume_token.clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|token| self.resumable.remove(&token).map(|(_, r)| r))
            .collect()
    }

    #[must_use]
    pub fn resumable_count(&self) -> usize {
        self.resumable.len()
    }
}

impl ClientDirectory for SessionManager {
    fn live_clients(&self) -> Vec<ClientView> {
        self.clients
            .iter()
            .filter(|s| !s.is_pending())
            .map(|s| ClientView {
                client_id: s.client_id,
                codec: s.codec,
                is_muted: s.is_muted.load(Ordering::Relaxed),
                volume_percent: s.volume_percent.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Mint an opaque resume token.
#[must_use]
pub fn new_resume_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
