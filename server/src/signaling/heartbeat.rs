//! Heartbeat monitoring and resumable-session expiry.

use std::time::Duration;

use gv_protocol::CLOSE_HEARTBEAT_TIMEOUT;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::state::AppState;

/// Scan live sessions for missed heartbeats and expire resumable records.
/// One task per server; runs until aborted.
pub fn spawn_heartbeat_monitor(state: AppState) -> JoinHandle<()> {
    let period = Duration::from_millis(state.config.heartbeat_interval_ms);
    let timeout = Duration::from_millis(state.config.heartbeat_timeout_ms);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;

            for session in state.sessions.all() {
                let age = session.heartbeat_age();
                if age > timeout {
                    warn!(
                        client_id = %session.client_id,
                        age_ms = age.as_millis() as u64,
                        "Heartbeat timeout, closing session"
                    );
                    session.close(CLOSE_HEARTBEAT_TIMEOUT, "Heartbeat timeout");
                }
            }

            for record in state.sessions.expire_resumables() {
                debug!(client_id = %record.client_id, "Resumable session expired");
                if !state.sessions.is_live(record.client_id) {
                    state.ids.remove(record.client_id);
                }
            }

            state.op_limiter.cleanup();
        }
    })
}
