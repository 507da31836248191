//! Signaling Errors

use thiserror::Error;

use crate::group::GroupError;
use crate::rtc::RtcError;

/// Errors surfaced to a client as an `error` frame.
#[derive(Debug, Error)]
pub enum SignalError {
    /// The message requires an authenticated session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Auth code did not validate.
    #[error("invalid username or auth code")]
    AuthFailed,

    /// Client and server share no audio codec.
    #[error("no mutually supported audio codec")]
    CodecUnsupported,

    /// Resume token/session mismatch, expiry, or the client is already live.
    #[error("session could not be resumed")]
    ResumeFailed,

    /// The caller lacks the admin flag.
    #[error("not authorized")]
    NotAuthorized,

    /// Too many group operations in a short window.
    #[error("too many requests, slow down")]
    RateLimited,

    /// Group model rejected the operation.
    #[error(transparent)]
    Group(#[from] GroupError),

    /// Transport layer rejected the operation.
    #[error(transparent)]
    Rtc(#[from] RtcError),

    /// Frame was not valid protocol JSON.
    #[error("invalid message: {0}")]
    Protocol(String),
}

impl SignalError {
    /// Stable machine code, where one is defined for this error.
    #[must_use]
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::NotAuthenticated => Some("not_authenticated"),
            Self::AuthFailed => Some("auth_failed"),
            Self::CodecUnsupported => Some("codec_unsupported"),
            Self::ResumeFailed => Some("resume_failed"),
            Self::NotAuthorized => Some("not_authorized"),
            Self::RateLimited => Some("rate_limited"),
            Self::Group(e) => e.code(),
            Self::Rtc(_) | Self::Protocol(_) => None,
        }
    }
}
