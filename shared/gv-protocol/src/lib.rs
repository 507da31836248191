//! `GameVoice` Wire Protocol
//!
//! Shared wire-level types used by the server and by clients:
//! the JSON signaling protocol spoken over the WebSocket, and the binary
//! audio payload format spoken over the WebRTC data channel.

pub mod audio;
pub mod messages;

pub use audio::{AudioCodec, AudioPayload, PayloadError, MAX_PAYLOAD_BYTES};
pub use messages::{ClientMessage, ServerMessage};

/// WebSocket close code sent when a client misses heartbeats.
pub const CLOSE_HEARTBEAT_TIMEOUT: u16 = 4000;

/// WebSocket close code sent when the in-game session never materialized.
pub const CLOSE_PENDING_GAME_TIMEOUT: u16 = 4002;
