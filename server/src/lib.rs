//! `GameVoice` Server
//!
//! Server-side proximity voice chat core for online multiplayer games:
//! WebSocket signaling, WebRTC data-channel audio transport, and group- and
//! distance-aware routing.

pub mod audio;
pub mod broadcast;
pub mod config;
pub mod game;
pub mod group;
pub mod rtc;
pub mod signaling;
pub mod state;
