//! Audio bridge: bounded ingress queue and the single routing worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use gv_protocol::{AudioCodec, AudioPayload};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::game::PositionTracker;
use crate::group::{ClientIdMap, GroupManager};

use super::gain::{apply_pcm_gain, distance_gain};
use super::router::{compute_recipients, RouteMode, RoutePolicy, RouteTarget};

/// Ingress queue depth; overflow drops the newest frame.
const INGRESS_QUEUE_DEPTH: usize = 1000;

/// Worker poll timeout, which doubles as the shutdown check interval.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Minimum spacing between capacity warnings.
const WARN_INTERVAL: Duration = Duration::from_secs(5);

/// One audio frame in flight between transport and router.
#[derive(Debug, Clone)]
pub struct IngressFrame {
    pub sender: Uuid,
    pub bytes: Bytes,
    pub enqueued_at: Instant,
}

/// Where encoded frames leave the engine (the peer manager in production).
pub trait FrameSink: Send + Sync {
    fn send_frame(&self, client_id: Uuid, frame: Bytes);
}

/// A live, non-pending client as the router needs to see it.
#[derive(Debug, Clone)]
pub struct ClientView {
    pub client_id: Uuid,
    pub codec: AudioCodec,
    pub is_muted: bool,
    /// Listener volume in percent (0..=200).
    pub volume_percent: u32,
}

/// Supplies the set of routable clients (the session manager in production).
pub trait ClientDirectory: Send + Sync {
    fn live_clients(&self) -> Vec<ClientView>;
}

/// Cheap cloneable handle for producing into the audio queue.
#[derive(Clone)]
pub struct AudioIngress {
    tx: mpsc::Sender<IngressFrame>,
    dropped: Arc<AtomicU64>,
    last_warn: Arc<Mutex<Option<Instant>>>,
}

impl AudioIngress {
    /// Enqueue a frame without ever blocking the producer. When the queue
    /// is full the newest frame is dropped, keeping queued audio fresh.
    pub fn push(&self, sender: Uuid, bytes: Bytes) {
        let frame = IngressFrame {
            sender,
            bytes,
            enqueued_at: Instant::now(),
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(frame) {
            let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            let mut last = self.last_warn.lock().expect("warn lock");
            let now = Instant::now();
            if last.is_none_or(|at| now - at >= WARN_INTERVAL) {
                *last = Some(now);
                warn!(dropped, "Audio queue full, dropping frames");
            }
        }
    }

    /// Frames dropped to overflow so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Everything the routing worker consults, wired at construction.
pub struct AudioDeps {
    pub sink: Arc<dyn FrameSink>,
    pub directory: Arc<dyn ClientDirectory>,
    pub groups: Arc<GroupManager>,
    pub ids: Arc<ClientIdMap>,
    pub positions: Arc<dyn PositionTracker>,
}

/// The audio engine: ingress queue plus the single worker task.
pub struct AudioBridge {
    config: Arc<Config>,
    ingress: AudioIngress,
    queue_rx: Mutex<Option<mpsc::Receiver<IngressFrame>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl AudioBridge {
    #[must_use]
    pub fn new(config: Arc<Config>) -> Self {
        let (tx, rx) = mpsc::channel(INGRESS_QUEUE_DEPTH);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            ingress: AudioIngress {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
                last_warn: Arc::new(Mutex::new(None)),
            },
            queue_rx: Mutex::new(Some(rx)),
            shutdown_tx,
        }
    }

    /// Producer handle for the transport layer.
    #[must_use]
    pub fn ingress(&self) -> AudioIngress {
        self.ingress.clone()
    }

    /// Accept one raw frame from a client's data channel.
    pub fn receive_audio(&self, client_id: Uuid, bytes: Bytes) {
        self.ingress.push(client_id, bytes);
    }

    /// Start the routing worker. Panics if called twice.
    pub fn start(&self, deps: AudioDeps) -> JoinHandle<()> {
        let rx = self
            .queue_rx
            .lock()
            .expect("queue lock")
            .take()
            .expect("audio worker already started");
        let config = self.config.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(run_worker(rx, deps, config, shutdown_rx))
    }

    /// Ask the worker to exit after its current poll.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<IngressFrame>,
    deps: AudioDeps,
    config: Arc<Config>,
    shutdown_rx: watch::Receiver<bool>,
) {
    debug!("Audio worker started");
    let mut oversize_warn: Option<Instant> = None;
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match timeout(POLL_TIMEOUT, rx.recv()).await {
            Ok(Some(frame)) => route_frame(&frame, &deps, &config, &mut oversize_warn),
            // All producers gone; nothing will ever arrive again.
            Ok(None) => break,
            // Poll timeout: loop around and re-check shutdown.
            Err(_) => {}
        }
    }
    debug!("Audio worker stopped");
}

/// Route one frame to every eligible recipient.
fn route_frame(
    frame: &IngressFrame,
    deps: &AudioDeps,
    config: &Config,
    oversize_warn: &mut Option<Instant>,
) {
    let Some(sender_pos) = deps.positions.get(frame.sender) else {
        trace!(sender = %frame.sender, "No position for sender, dropping frame");
        return;
    };

    let clients = deps.directory.live_clients();
    let Some(sender_view) = clients.iter().find(|c| c.client_id == frame.sender) else {
        return;
    };
    if sender_view.is_muted {
        return;
    }
    let codec = sender_view.codec;

    let sender_group = deps.groups.get_player_group(frame.sender);
    let targets: Vec<RouteTarget> = clients
        .iter()
        .filter(|c| c.client_id != frame.sender)
        .map(|c| {
            let group = deps.groups.get_player_group(c.client_id);
            RouteTarget {
                client_id: c.client_id,
                position: deps.positions.get(c.client_id),
                group_id: group.as_ref().map(|g| g.id),
                group_isolated: group.as_ref().is_some_and(|g| g.is_isolated),
            }
        })
        .collect();

    let policy = RoutePolicy {
        group_global_voice: config.group_global_voice,
        group_spatial_audio: config.group_spatial_audio,
        proximity_distance: config.default_proximity_distance,
    };
    let recipients = compute_recipients(
        frame.sender,
        &sender_pos,
        sender_group.as_ref(),
        &targets,
        &policy,
    );
    if recipients.is_empty() {
        return;
    }

    let sender_token = match deps.ids.obfuscate(frame.sender) {
        Ok(token) => token,
        Err(e) => {
            warn!(sender = %frame.sender, error = %e, "No obfuscated id for sender");
            return;
        }
    };

    for recipient in recipients {
        let Some(view) = clients.iter().find(|c| c.client_id == recipient.client_id) else {
            continue;
        };
        // No transcoding: a recipient on another codec cannot play this.
        if view.codec != codec {
            continue;
        }

        let mut gain = match recipient.mode {
            RouteMode::FullVolume => 1.0,
            RouteMode::Normal => distance_gain(
                recipient.distance,
                recipient.max_range,
                config.proximity_fade_start_ratio,
                config.proximity_rolloff_factor,
            ),
            RouteMode::MinVolume => distance_gain(
                recipient.distance,
                recipient.max_range,
                config.proximity_fade_start_ratio,
                config.proximity_rolloff_factor,
            )
            .max(config.group_min_volume),
        };
        if config.server_side_volume_enabled {
            gain *= (view.volume_percent.min(200) as f32) / 100.0;
        }

        let proximity = config
            .proximity_radar_enabled
            .then(|| (recipient.distance as f32, recipient.max_range as f32));

        let payload = match codec {
            AudioCodec::Pcm => {
                let mut pcm = frame.bytes.to_vec();
                apply_pcm_gain(&mut pcm, gain);
                AudioPayload {
                    sender: sender_token.clone(),
                    codec,
                    proximity,
                    gain: None,
                    audio: Bytes::from(pcm),
                }
            }
            AudioCodec::Opus => AudioPayload {
                sender: sender_token.clone(),
                codec,
                proximity,
                gain: (gain < 1.0).then_some(gain),
                audio: frame.bytes.clone(),
            },
        };

        match payload.encode() {
            Ok(encoded) => deps.sink.send_frame(recipient.client_id, encoded),
            Err(e) => {
                let now = Instant::now();
                if oversize_warn.is_none_or(|at| now - at >= WARN_INTERVAL) {
                    *oversize_warn = Some(now);
                    warn!(sender = %frame.sender, error = %e, "Dropping unencodable frame");
                }
            }
        }
    }
}
