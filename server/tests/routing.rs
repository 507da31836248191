//! End-to-end audio routing: frames in through the bridge, encoded payloads
//! out through a capturing sink.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use gv_protocol::messages::GroupSettingsData;
use gv_protocol::{AudioCodec, AudioPayload};
use tokio::sync::mpsc;
use uuid::Uuid;

use gv_server::audio::{AudioBridge, AudioDeps, ClientDirectory, FrameSink};
use gv_server::config::Config;
use gv_server::game::{InMemoryPositionTracker, PlayerPosition, PositionTracker};
use gv_server::group::{ClientIdMap, GroupLimits, GroupManager};
use gv_server::signaling::{new_resume_token, ClientSession, SessionManager};

#[derive(Default)]
struct CaptureSink {
    frames: Mutex<Vec<(Uuid, Bytes)>>,
}

impl FrameSink for CaptureSink {
    fn send_frame(&self, client_id: Uuid, frame: Bytes) {
        self.frames.lock().unwrap().push((client_id, frame));
    }
}

impl CaptureSink {
    fn take(&self) -> Vec<(Uuid, Bytes)> {
        std::mem::take(&mut self.frames.lock().unwrap())
    }
}

struct Harness {
    bridge: Arc<AudioBridge>,
    sink: Arc<CaptureSink>,
    sessions: Arc<SessionManager>,
    groups: Arc<GroupManager>,
    ids: Arc<ClientIdMap>,
    positions: Arc<InMemoryPositionTracker>,
}

impl Harness {
    fn new(mut mutate: impl FnMut(&mut Config)) -> Self {
        let mut config = Config::default_for_test();
        mutate(&mut config);
        let config = Arc::new(config);

        let sessions = Arc::new(SessionManager::new(Duration::from_secs(30)));
        let groups = Arc::new(GroupManager::new(GroupLimits::from_config(&config)));
        let ids = Arc::new(ClientIdMap::new());
        let positions = Arc::new(InMemoryPositionTracker::new());
        let sink = Arc::new(CaptureSink::default());
        let bridge = Arc::new(AudioBridge::new(config.clone()));

        let sink_dyn: Arc<dyn FrameSink> = sink.clone();
        let directory: Arc<dyn ClientDirectory> = sessions.clone();
        bridge.start(AudioDeps {
            sink: sink_dyn,
            directory,
            groups: groups.clone(),
            ids: ids.clone(),
            positions: positions.clone(),
        });

        Self {
            bridge,
            sink,
            sessions,
            groups,
            ids,
            positions,
        }
    }

    fn add_client(&self, codec: AudioCodec, x: f64) -> Uuid {
        let client_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(16);
        let (close_tx, _close_rx) = mpsc::channel(1);
        self.sessions.insert(Arc::new(ClientSession::new(
            client_id,
            format!("player-{client_id}"),
            Uuid::new_v4(),
            Uuid::new_v4(),
            codec,
            false,
            new_resume_token(),
            tx,
            close_tx,
        )));
        self.positions.update(PlayerPosition {
            player_id: client_id,
            username: format!("player-{client_id}"),
            x,
            y: 64.0,
            z: 0.0,
            yaw: 0.0,
            pitch: 0.0,
            world_id: "overworld".into(),
            captured_at: Utc::now(),
        });
        client_id
    }

    async fn pump(&self) {
        tokio::time::sleep(Duration::from_millis(150)).await;
    }
}

#[tokio::test]
async fn pcm_frame_routes_to_group_member_at_full_gain() {
    let harness = Harness::new(|c| {
        c.group_global_voice = false;
        c.server_side_volume_enabled = false;
    });
    let alice = harness.add_client(AudioCodec::Pcm, 0.0);
    let bob = harness.add_client(AudioCodec::Pcm, 10.0);

    let settings = GroupSettingsData {
        max_members: Some(3),
        proximity_range: Some(30.0),
        ..GroupSettingsData::default()
    };
    let group = harness
        .groups
        .create_group("lobby", false, alice, &settings, None, None)
        .unwrap();
    harness.groups.join_group(bob, group.id).unwrap();

    let pcm: Vec<u8> = (0..320u32).map(|i| (i % 251) as u8).collect();
    harness.bridge.receive_audio(alice, Bytes::from(pcm.clone()));
    harness.pump().await;

    let frames = harness.sink.take();
    assert_eq!(frames.len(), 1);
    let (recipient, encoded) = &frames[0];
    assert_eq!(*recipient, bob);

    let payload = AudioPayload::decode(encoded.clone()).unwrap();
    assert_eq!(payload.codec, AudioCodec::Pcm);
    assert_eq!(payload.sender, harness.ids.token_of(alice).unwrap());
    // d = 10 < fade start 21, so the samples pass through untouched.
    assert_eq!(payload.audio.as_ref(), &pcm[..]);
    // Radar enabled: proximity metadata rides along (version 2).
    let (distance, max_range) = payload.proximity.unwrap();
    assert!((distance - 10.0).abs() < f32::EPSILON);
    assert!((max_range - 30.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn isolated_group_blocks_nearby_outsiders() {
    let harness = Harness::new(|c| {
        c.server_side_volume_enabled = false;
    });
    let alice = harness.add_client(AudioCodec::Opus, 0.0);
    let bob = harness.add_client(AudioCodec::Opus, 5.0);
    let outsider = harness.add_client(AudioCodec::Opus, 3.0);

    let group = harness
        .groups
        .create_group(
            "covert ops",
            false,
            alice,
            &GroupSettingsData::default(),
            Some(true),
            None,
        )
        .unwrap();
    harness.groups.join_group(bob, group.id).unwrap();

    harness
        .bridge
        .receive_audio(alice, Bytes::from_static(&[0u8; 64]));
    harness.pump().await;

    let frames = harness.sink.take();
    assert_eq!(frames.len(), 1, "only the fellow member may hear");
    assert_eq!(frames[0].0, bob);
    let _ = outsider;
}

#[tokio::test]
async fn cross_world_audio_never_routes() {
    let harness = Harness::new(|_| {});
    let alice = harness.add_client(AudioCodec::Opus, 0.0);
    let bob = harness.add_client(AudioCodec::Opus, 1.0);
    harness.positions.update(PlayerPosition {
        player_id: bob,
        username: "bob".into(),
        x: 1.0,
        y: 64.0,
        z: 0.0,
        yaw: 0.0,
        pitch: 0.0,
        world_id: "nether".into(),
        captured_at: Utc::now(),
    });

    harness
        .bridge
        .receive_audio(alice, Bytes::from_static(&[0u8; 64]));
    harness.pump().await;

    assert!(harness.sink.take().is_empty());
}

#[tokio::test]
async fn oversize_frames_are_dropped() {
    let harness = Harness::new(|c| {
        c.proximity_radar_enabled = false;
        c.server_side_volume_enabled = false;
    });
    let alice = harness.add_client(AudioCodec::Pcm, 0.0);
    let _bob = harness.add_client(AudioCodec::Pcm, 1.0);

    // v1 header = 2 + 6-byte sender token; exactly at the cap goes through.
    let fits = 900 - 8;
    harness
        .bridge
        .receive_audio(alice, Bytes::from(vec![0u8; fits]));
    harness.pump().await;
    assert_eq!(harness.sink.take().len(), 1);

    harness
        .bridge
        .receive_audio(alice, Bytes::from(vec![0u8; fits + 1]));
    harness.pump().await;
    assert!(harness.sink.take().is_empty());
}

#[tokio::test]
async fn opus_gain_travels_as_metadata() {
    let harness = Harness::new(|c| {
        c.group_global_voice = false;
        c.proximity_radar_enabled = false;
        c.server_side_volume_enabled = false;
    });
    let alice = harness.add_client(AudioCodec::Opus, 0.0);
    let bob = harness.add_client(AudioCodec::Opus, 40.0);

    let opus_frame: Vec<u8> = vec![0xf8, 0xff, 0xfe, 0x01, 0x02];
    harness
        .bridge
        .receive_audio(alice, Bytes::from(opus_frame.clone()));
    harness.pump().await;

    let frames = harness.sink.take();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, bob);
    let payload = AudioPayload::decode(frames[0].1.clone()).unwrap();
    // Opus bytes are never rescaled; the fade gain rides as metadata.
    assert_eq!(payload.audio.as_ref(), &opus_frame[..]);
    let gain = payload.gain.unwrap();
    // 40 of 48 m is inside the fade zone: audible but quieter.
    assert!(gain > 0.0 && gain < 1.0);
}

#[tokio::test]
async fn muted_senders_are_not_routed() {
    let harness = Harness::new(|_| {});
    let alice = harness.add_client(AudioCodec::Opus, 0.0);
    let _bob = harness.add_client(AudioCodec::Opus, 1.0);
    harness
        .sessions
        .get(alice)
        .unwrap()
        .is_muted
        .store(true, std::sync::atomic::Ordering::Relaxed);

    harness
        .bridge
        .receive_audio(alice, Bytes::from_static(&[0u8; 32]));
    harness.pump().await;

    assert!(harness.sink.take().is_empty());
}

#[tokio::test]
async fn recipients_on_another_codec_are_skipped() {
    let harness = Harness::new(|_| {});
    let alice = harness.add_client(AudioCodec::Opus, 0.0);
    let _bob = harness.add_client(AudioCodec::Pcm, 1.0);

    harness
        .bridge
        .receive_audio(alice, Bytes::from_static(&[0u8; 32]));
    harness.pump().await;

    assert!(harness.sink.take().is_empty());
}

#[tokio::test]
async fn proximity_boundary_is_inclusive() {
    let harness = Harness::new(|c| {
        c.proximity_radar_enabled = false;
        c.server_side_volume_enabled = false;
    });
    let alice = harness.add_client(AudioCodec::Opus, 0.0);
    let at_edge = harness.add_client(AudioCodec::Opus, 48.0);
    let past_edge = harness.add_client(AudioCodec::Opus, 48.5);

    harness
        .bridge
        .receive_audio(alice, Bytes::from_static(&[0u8; 32]));
    harness.pump().await;

    let frames = harness.sink.take();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].0, at_edge);
    let _ = past_edge;
}
