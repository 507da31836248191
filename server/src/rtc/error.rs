//! Transport Layer Errors

use thiserror::Error;

/// Errors that can occur in the WebRTC transport layer.
#[derive(Debug, Error)]
pub enum RtcError {
    /// Offer SDP could not be parsed.
    #[error("invalid SDP: {0}")]
    Sdp(String),

    /// The offer carried no `m=application` section.
    #[error("offer has no application (data channel) section")]
    NoApplicationSection,

    /// A trickle candidate line could not be parsed.
    #[error("invalid ICE candidate: {0}")]
    Candidate(String),

    /// ICE agent failure.
    #[error("ICE error: {0}")]
    Ice(String),

    /// DTLS handshake or transport failure.
    #[error("DTLS error: {0}")]
    Dtls(String),

    /// SCTP association failure.
    #[error("SCTP error: {0}")]
    Sctp(String),

    /// Malformed DCEP control message.
    #[error("DCEP error: {0}")]
    Dcep(String),

    /// The peer session is gone.
    #[error("peer session closed")]
    PeerClosed,

    /// No offer has been processed yet.
    #[error("no remote description")]
    NoRemoteDescription,
}

impl From<webrtc::ice::Error> for RtcError {
    fn from(err: webrtc::ice::Error) -> Self {
        Self::Ice(err.to_string())
    }
}

impl From<webrtc::dtls::Error> for RtcError {
    fn from(err: webrtc::dtls::Error) -> Self {
        Self::Dtls(err.to_string())
    }
}

impl From<webrtc::sctp::Error> for RtcError {
    fn from(err: webrtc::sctp::Error) -> Self {
        Self::Sctp(err.to_string())
    }
}
