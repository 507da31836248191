//! Server Configuration
//!
//! Loads configuration from environment variables.

use anyhow::{Context, Result};
use std::env;

use gv_protocol::AudioCodec;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the signaling WebSocket listens on.
    pub signaling_port: u16,

    /// Terminate TLS in-process. When false the server binds plain TCP
    /// (e.g. behind a reverse proxy).
    pub ssl_enabled: bool,

    /// PEM certificate chain path (required when `ssl_enabled`).
    pub ssl_cert_path: Option<String>,

    /// PEM private key path (required when `ssl_enabled`).
    pub ssl_key_path: Option<String>,

    /// Origins accepted on the WebSocket upgrade. `*` allows any.
    pub allowed_origins: Vec<String>,

    /// STUN server URLs advertised to clients.
    pub stun_servers: Vec<String>,

    /// How often clients must send heartbeats (default 15 s).
    pub heartbeat_interval_ms: u64,

    /// Idle cutoff after which a session is closed with code 4000 (default 45 s).
    pub heartbeat_timeout_ms: u64,

    /// How long a disconnected session stays resumable (default 30 s).
    pub resume_window_ms: u64,

    /// How long an authenticated session may wait for its in-game session
    /// before being closed with code 4002.
    pub pending_game_join_timeout_seconds: u64,

    /// Proximity range (meters) for clients not in a group.
    pub default_proximity_distance: f64,

    /// Upper clamp for any proximity range.
    pub max_voice_distance: f64,

    /// Fraction of the range at which distance fade begins (default 0.7).
    pub proximity_fade_start_ratio: f64,

    /// Exponent of the fade curve (default 1.5).
    pub proximity_rolloff_factor: f64,

    /// Apply per-listener volume to PCM samples server-side.
    pub server_side_volume_enabled: bool,

    /// Group members hear each other regardless of distance.
    pub group_global_voice: bool,

    /// Distance-scale global group voice instead of full volume.
    pub group_spatial_audio: bool,

    /// Gain floor for spatial group audio.
    pub group_min_volume: f32,

    /// New groups are isolated unless the creator says otherwise.
    pub default_group_is_isolated: bool,

    /// Maximum group name length (minimum is always 3).
    pub max_group_name_length: usize,

    /// Accept and route opus frames over the data channel.
    pub opus_data_channel_enabled: bool,

    /// Opus parameters, advertised to clients (the server never transcodes).
    pub opus_sample_rate: u32,
    pub opus_channels: u8,
    pub opus_frame_duration_ms: u32,
    pub opus_target_bitrate: u32,

    /// Period of the proximity radar broadcast.
    pub position_broadcast_interval_ms: u64,

    /// Emit `position_update` frames at all.
    pub proximity_radar_enabled: bool,

    /// Restrict the radar to players currently speaking.
    pub proximity_radar_speaking_only_enabled: bool,

    /// Reserved transport selector; only `datachannel` is implemented.
    pub webrtc_transport_mode: String,

    /// Usernames granted the admin flag at authentication.
    pub admin_usernames: Vec<String>,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    env::var(key)
        .map(|s| {
            s.split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_else(|_| default.iter().map(|s| (*s).to_string()).collect())
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let ssl_enabled = env_bool("SSL_ENABLED", false);
        let ssl_cert_path = env::var("SSL_CERT_PATH").ok();
        let ssl_key_path = env::var("SSL_KEY_PATH").ok();
        if ssl_enabled {
            ssl_cert_path
                .as_ref()
                .context("SSL_CERT_PATH must be set when SSL_ENABLED")?;
            ssl_key_path
                .as_ref()
                .context("SSL_KEY_PATH must be set when SSL_ENABLED")?;
        }

        Ok(Self {
            signaling_port: env_parse("SIGNALING_PORT", 24454),
            ssl_enabled,
            ssl_cert_path,
            ssl_key_path,
            allowed_origins: env_list("ALLOWED_ORIGINS", &["*"]),
            stun_servers: env_list("STUN_SERVERS", &["stun:stun.l.google.com:19302"]),
            heartbeat_interval_ms: env_parse("HEARTBEAT_INTERVAL_MS", 15_000),
            heartbeat_timeout_ms: env_parse("HEARTBEAT_TIMEOUT_MS", 45_000),
            resume_window_ms: env_parse("RESUME_WINDOW_MS", 30_000),
            pending_game_join_timeout_seconds: env_parse("PENDING_GAME_JOIN_TIMEOUT_SECONDS", 60),
            default_proximity_distance: env_parse("DEFAULT_PROXIMITY_DISTANCE", 48.0),
            max_voice_distance: env_parse("MAX_VOICE_DISTANCE", 128.0),
            proximity_fade_start_ratio: env_parse("PROXIMITY_FADE_START_RATIO", 0.7),
            proximity_rolloff_factor: env_parse("PROXIMITY_ROLLOFF_FACTOR", 1.5),
            server_side_volume_enabled: env_bool("SERVER_SIDE_VOLUME_ENABLED", true),
            group_global_voice: env_bool("GROUP_GLOBAL_VOICE", true),
            group_spatial_audio: env_bool("GROUP_SPATIAL_AUDIO", false),
            group_min_volume: env_parse("GROUP_MIN_VOLUME", 0.1),
            default_group_is_isolated: env_bool("DEFAULT_GROUP_IS_ISOLATED", false),
            max_group_name_length: env_parse("MAX_GROUP_NAME_LENGTH", 24),
            opus_data_channel_enabled: env_bool("OPUS_DATA_CHANNEL_ENABLED", true),
            opus_sample_rate: env_parse("OPUS_SAMPLE_RATE", 48_000),
            opus_channels: env_parse("OPUS_CHANNELS", 2),
            opus_frame_duration_ms: env_parse("OPUS_FRAME_DURATION_MS", 20),
            opus_target_bitrate: env_parse("OPUS_TARGET_BITRATE", 32_000),
            position_broadcast_interval_ms: env_parse("POSITION_BROADCAST_INTERVAL_MS", 100),
            proximity_radar_enabled: env_bool("PROXIMITY_RADAR_ENABLED", true),
            proximity_radar_speaking_only_enabled: env_bool(
                "PROXIMITY_RADAR_SPEAKING_ONLY_ENABLED",
                false,
            ),
            webrtc_transport_mode: env::var("WEBRTC_TRANSPORT_MODE")
                .unwrap_or_else(|_| "datachannel".into()),
            admin_usernames: env_list("ADMIN_USERNAMES", &[]),
        })
    }

    /// The codec the server negotiates by default.
    #[must_use]
    pub const fn default_audio_codec(&self) -> AudioCodec {
        if self.opus_data_channel_enabled {
            AudioCodec::Opus
        } else {
            AudioCodec::Pcm
        }
    }

    /// Whether `origin` passes the allowlist.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|o| o == "*" || o.eq_ignore_ascii_case(origin))
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            signaling_port: 0,
            ssl_enabled: false,
            ssl_cert_path: None,
            ssl_key_path: None,
            allowed_origins: vec!["*".into()],
            stun_servers: vec!["stun:stun.l.google.com:19302".into()],
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 45_000,
            resume_window_ms: 30_000,
            pending_game_join_timeout_seconds: 60,
            default_proximity_distance: 48.0,
            max_voice_distance: 128.0,
            proximity_fade_start_ratio: 0.7,
            proximity_rolloff_factor: 1.5,
            server_side_volume_enabled: true,
            group_global_voice: true,
            group_spatial_audio: false,
            group_min_volume: 0.1,
            default_group_is_isolated: false,
            max_group_name_length: 24,
            opus_data_channel_enabled: true,
            opus_sample_rate: 48_000,
            opus_channels: 2,
            opus_frame_duration_ms: 20,
            opus_target_bitrate: 32_000,
            position_broadcast_interval_ms: 100,
            proximity_radar_enabled: true,
            proximity_radar_speaking_only_enabled: false,
            webrtc_transport_mode: "datachannel".into(),
            admin_usernames: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_allowlist() {
        let mut config = Config::default_for_test();
        assert!(config.origin_allowed("https://anywhere.example"));

        config.allowed_origins = vec!["https://game.example".into()];
        assert!(config.origin_allowed("https://game.example"));
        assert!(config.origin_allowed("HTTPS://GAME.EXAMPLE"));
        assert!(!config.origin_allowed("https://evil.example"));
    }

    #[test]
    fn default_codec_follows_opus_flag() {
        let mut config = Config::default_for_test();
        assert_eq!(config.default_audio_codec(), AudioCodec::Opus);
        config.opus_data_channel_enabled = false;
        assert_eq!(config.default_audio_codec(), AudioCodec::Pcm);
    }
}
