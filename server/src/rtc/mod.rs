//! WebRTC Transport Layer
//!
//! One peer session per client: trickle ICE, a passive DTLS transport and
//! an SCTP association carrying DCEP-negotiated data channels. The peer
//! sessions are owned actors; this module is their registry.

pub mod dcep;
pub mod error;
pub mod ice;
mod peer;
pub mod sdp;
mod sender;

use bytes::Bytes;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;
use webrtc::dtls::crypto::Certificate as DtlsCertificate;

use gv_protocol::ServerMessage;

use crate::audio::{AudioIngress, FrameSink};

pub use error::RtcError;
pub use peer::{DataChannel, PeerHandle, PeerState};
pub use sender::SendOutcome;

/// Candidates buffered for a client with no peer session yet.
const MAX_BUFFERED_CANDIDATES: usize = 64;

/// Registry of live peer sessions plus the shared DTLS identity.
pub struct PeerManager {
    peers: DashMap<Uuid, PeerHandle>,
    pending_candidates: DashMap<Uuid, Vec<String>>,
    certificate: DtlsCertificate,
    fingerprint: String,
    audio_ingress: AudioIngress,
}

impl PeerManager {
    /// Generate the server's DTLS identity and an empty registry.
    pub fn new(audio_ingress: AudioIngress) -> Result<Self, RtcError> {
        let certificate = DtlsCertificate::generate_self_signed(vec!["gamevoice".to_owned()])?;
        let fingerprint = certificate_fingerprint(&certificate);
        Ok(Self {
            peers: DashMap::new(),
            pending_candidates: DashMap::new(),
            certificate,
            fingerprint,
            audio_ingress,
        })
    }

    /// The SHA-256 fingerprint advertised in every answer.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Process an offer, creating the peer session on first contact, and
    /// return the answer SDP. Candidates buffered before the session
    /// existed are flushed into it first.
    pub async fn handle_offer(
        &self,
        client_id: Uuid,
        sdp: String,
        signal_tx: mpsc::Sender<ServerMessage>,
    ) -> Result<String, RtcError> {
        let handle = match self.peers.get(&client_id) {
            Some(handle) => handle.clone(),
            None => {
                let handle = peer::spawn(
                    client_id,
                    self.certificate.clone(),
                    self.fingerprint.clone(),
                    signal_tx,
                    self.audio_ingress.clone(),
                )
                .await?;
                if let Some((_, buffered)) = self.pending_candidates.remove(&client_id) {
                    debug!(
                        client_id = %client_id,
                        count = buffered.len(),
                        "Flushing buffered candidates"
                    );
                    for line in buffered {
                        handle.add_candidate(line);
                    }
                }
                self.peers.insert(client_id, handle.clone());
                handle
            }
        };
        handle.set_offer(sdp).await
    }

    /// Deliver a trickle candidate, buffering it when the peer session does
    /// not exist yet.
    pub fn add_candidate(&self, client_id: Uuid, line: String) {
        if let Some(handle) = self.peers.get(&client_id) {
            handle.add_candidate(line);
            return;
        }
        let mut buffered = self.pending_candidates.entry(client_id).or_default();
        if buffered.len() < MAX_BUFFERED_CANDIDATES {
            buffered.push(line);
        }
    }

    pub fn end_of_candidates(&self, client_id: Uuid) {
        if let Some(handle) = self.peers.get(&client_id) {
            handle.end_of_candidates();
        }
    }

    pub fn start_datachannel(&self, client_id: Uuid) {
        if let Some(handle) = self.peers.get(&client_id) {
            handle.start_datachannel();
        }
    }

    #[must_use]
    pub fn peer_state(&self, client_id: Uuid) -> Option<PeerState> {
        self.peers.get(&client_id).map(|h| h.state())
    }

    /// Tear down a client's peer session and any buffered candidates.
    pub fn remove(&self, client_id: Uuid) {
        self.pending_candidates.remove(&client_id);
        if let Some((_, handle)) = self.peers.remove(&client_id) {
            handle.close();
        }
    }

    /// Close every peer session.
    pub fn shutdown(&self) {
        for entry in self.peers.iter() {
            entry.close();
        }
        self.peers.clear();
        self.pending_candidates.clear();
    }
}

impl FrameSink for PeerManager {
    fn send_frame(&self, client_id: Uuid, frame: Bytes) {
        if let Some(handle) = self.peers.get(&client_id) {
            handle.send_audio(frame);
        }
    }
}

/// Colon-separated uppercase SHA-256 digest of the certificate DER.
fn certificate_fingerprint(certificate: &DtlsCertificate) -> String {
    let der = certificate
        .certificate
        .first()
        .map(|c| c.as_ref())
        .unwrap_or_default();
    Sha256::digest(der)
        .iter()
        .map(|byte| format!("{byte:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_format() {
        let certificate =
            DtlsCertificate::generate_self_signed(vec!["gamevoice".to_owned()]).unwrap();
        let fingerprint = certificate_fingerprint(&certificate);

        // 32 bytes, colon separated, uppercase hex.
        assert_eq!(fingerprint.len(), 32 * 3 - 1);
        assert!(fingerprint
            .split(':')
            .all(|pair| pair.len() == 2
                && pair.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase())));
    }
}
