//! Position & Broadcast Scheduler
//!
//! A periodic task that sends each live client a proximity-filtered radar
//! frame: who is nearby, where, and how far. The effective range is the
//! listener's group range when they are in a group, the server default
//! otherwise.

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use gv_protocol::messages::PositionEntry;
use gv_protocol::ServerMessage;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::game::PlayerPosition;
use crate::state::AppState;

/// Start the radar broadcaster. Does nothing when the radar is disabled.
pub fn spawn_position_broadcaster(state: AppState) -> JoinHandle<()> {
    tokio::spawn(async move {
        if !state.config.proximity_radar_enabled {
            info!("Proximity radar disabled, broadcaster idle");
            return;
        }
        let period = Duration::from_millis(state.config.position_broadcast_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            broadcast_positions(&state);
        }
    })
}

fn broadcast_positions(state: &AppState) {
    let sessions = state.sessions.all();
    let speaking_only = state.config.proximity_radar_speaking_only_enabled;

    for listener in &sessions {
        if listener.is_pending() {
            continue;
        }
        let Some(listener_pos) = state.positions.get(listener.client_id) else {
            continue;
        };
        let range = state
            .groups
            .get_player_group(listener.client_id)
            .map_or(state.config.default_proximity_distance, |g| {
                g.settings.proximity_range
            });

        let mut positions = Vec::new();
        for other in &sessions {
            if other.client_id == listener.client_id || other.is_pending() {
                continue;
            }
            if speaking_only && !other.is_speaking.load(Ordering::Relaxed) {
                continue;
            }
            let Some(position) = state.positions.get(other.client_id) else {
                continue;
            };
            let distance = listener_pos.distance_to(&position);
            if distance > range {
                continue;
            }
            let Ok(user_id) = state.ids.obfuscate(other.client_id) else {
                continue;
            };
            positions.push(entry(&position, user_id, Some(round1(distance))));
        }

        // Nothing nearby, nothing to say.
        if positions.is_empty() {
            continue;
        }
        let Ok(listener_token) = state.ids.obfuscate(listener.client_id) else {
            continue;
        };
        listener.send(ServerMessage::PositionUpdate {
            listener: entry(&listener_pos, listener_token, None),
            positions,
            timestamp: Utc::now().timestamp_millis(),
        });
    }
}

fn entry(position: &PlayerPosition, user_id: String, distance: Option<f64>) -> PositionEntry {
    PositionEntry {
        user_id,
        username: distance.is_some().then(|| position.username.clone()),
        x: position.x,
        y: position.y,
        z: position.z,
        yaw: position.yaw,
        pitch: position.pitch,
        world_id: position.world_id.clone(),
        distance,
    }
}

/// Round to one decimal place for the wire.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_one_decimal() {
        assert!((round1(10.04) - 10.0).abs() < f64::EPSILON);
        assert!((round1(10.05) - 10.1).abs() < f64::EPSILON);
        assert!((round1(3.333) - 3.3).abs() < f64::EPSILON);
    }
}
