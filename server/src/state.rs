//! Shared application state.
//!
//! Every subsystem is constructed once in `main` and handed around as an
//! `Arc`; the state is the explicit wiring point that keeps the subsystems
//! free of back-pointers.

use std::sync::Arc;

use crate::audio::AudioBridge;
use crate::config::Config;
use crate::game::{AuthCodeStore, PlayerPresence, PositionTracker};
use crate::group::{ClientIdMap, GroupManager};
use crate::rtc::PeerManager;
use crate::signaling::{OpRateLimiter, SessionManager};

/// Handles shared by the signaling handlers and background tasks.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    pub groups: Arc<GroupManager>,
    pub ids: Arc<ClientIdMap>,
    pub peers: Arc<PeerManager>,
    pub audio: Arc<AudioBridge>,
    pub positions: Arc<dyn PositionTracker>,
    pub presence: Arc<dyn PlayerPresence>,
    pub auth: Arc<dyn AuthCodeStore>,
    pub op_limiter: Arc<OpRateLimiter>,
}
