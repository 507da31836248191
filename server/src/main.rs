//! GameVoice Server - Main Entry Point
//!
//! Proximity voice chat backend for online multiplayer games.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use gv_server::audio::{AudioBridge, AudioDeps, ClientDirectory, FrameSink};
use gv_server::broadcast::spawn_position_broadcaster;
use gv_server::config::Config;
use gv_server::game::{
    AuthCodeStore, InMemoryAuthCodeStore, InMemoryPlayerPresence, InMemoryPositionTracker,
    PlayerPresence, PositionTracker,
};
use gv_server::group::{ClientIdMap, GroupLimits, GroupManager};
use gv_server::rtc::PeerManager;
use gv_server::signaling::{
    self, broadcasts::spawn_group_event_task, spawn_heartbeat_monitor, OpRateLimiter,
    SessionManager,
};
use gv_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize rustls crypto provider (required for DTLS)
    // This must happen before any TLS/WebRTC operations
    let _ = rustls::crypto::CryptoProvider::install_default(
        rustls::crypto::ring::default_provider(),
    );

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gv_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Arc::new(Config::from_env()?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.signaling_port,
        "Starting GameVoice Server"
    );

    // Core subsystems
    let sessions = Arc::new(SessionManager::new(Duration::from_millis(
        config.resume_window_ms,
    )));
    let groups = Arc::new(GroupManager::new(GroupLimits::from_config(&config)));
    let ids = Arc::new(ClientIdMap::new());
    let positions: Arc<dyn PositionTracker> = Arc::new(InMemoryPositionTracker::new());
    let presence: Arc<dyn PlayerPresence> = Arc::new(InMemoryPlayerPresence::new());
    let auth: Arc<dyn AuthCodeStore> = Arc::new(InMemoryAuthCodeStore::new());

    let audio = Arc::new(AudioBridge::new(config.clone()));
    let peers = Arc::new(PeerManager::new(audio.ingress())?);
    info!(fingerprint = %peers.fingerprint(), "DTLS identity ready");

    // Audio worker: peers sink frames in, sessions say who is routable
    let sink: Arc<dyn FrameSink> = peers.clone();
    let directory: Arc<dyn ClientDirectory> = sessions.clone();
    let audio_worker = audio.start(AudioDeps {
        sink,
        directory,
        groups: groups.clone(),
        ids: ids.clone(),
        positions: positions.clone(),
    });

    let state = AppState {
        config: config.clone(),
        sessions: sessions.clone(),
        groups: groups.clone(),
        ids,
        peers: peers.clone(),
        audio: audio.clone(),
        positions,
        presence,
        auth,
        op_limiter: Arc::new(OpRateLimiter::default()),
    };

    // Background tasks
    let group_events = spawn_group_event_task(state.clone());
    let heartbeat = spawn_heartbeat_monitor(state.clone());
    let broadcaster = spawn_position_broadcaster(state.clone());

    // Router and listener
    let app = signaling::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.signaling_port));
    let handle = axum_server::Handle::new();

    // Graceful shutdown handler
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
            info!("Received shutdown signal, cleaning up...");
            handle.graceful_shutdown(Some(Duration::from_secs(5)));
        });
    }

    if config.ssl_enabled {
        let cert = config
            .ssl_cert_path
            .as_ref()
            .context("SSL_CERT_PATH missing")?;
        let key = config.ssl_key_path.as_ref().context("SSL_KEY_PATH missing")?;
        let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
            .await
            .context("loading TLS certificate")?;
        info!(address = %addr, "Server listening (TLS)");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!(address = %addr, "Server listening");
        axum_server::bind(addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    }

    // Stop background work, drop sessions, clear the group model
    broadcaster.abort();
    heartbeat.abort();
    audio.shutdown();
    let _ = audio_worker.await;
    for session in sessions.all() {
        session.close(1000, "Server shutting down");
    }
    peers.shutdown();
    groups.shutdown();
    group_events.abort();

    info!("Server shutdown complete");

    Ok(())
}
