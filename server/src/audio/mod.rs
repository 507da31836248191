//! Audio Routing Engine
//!
//! Frames arrive from the transport layer on a bounded ingress queue; a
//! single worker drains it in FIFO order, so per-sender frame order is
//! preserved all the way to each recipient's data channel. Routing decides
//! who hears what (`router`), the gain curve decides how loud (`gain`),
//! and the shared payload codec puts it on the wire.

mod bridge;
mod gain;
mod router;

pub use bridge::{
    AudioBridge, AudioDeps, AudioIngress, ClientDirectory, ClientView, FrameSink, IngressFrame,
};
pub use gain::{apply_pcm_gain, distance_gain};
pub use router::{compute_recipients, Recipient, RouteMode, RoutePolicy, RouteTarget};
