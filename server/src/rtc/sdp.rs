//! Offer parsing and answer construction.
//!
//! The server only ever answers. The offer is scanned for the media
//! sections, their mids and directions, and the remote ICE credentials; the
//! answer is built line-by-line so its output is a pure function of the
//! offer, the local ICE credentials and the DTLS fingerprint.

use std::fmt::Write as _;

use super::error::RtcError;

/// SCTP port advertised in the application section.
const SCTP_PORT: u16 = 5000;

/// Maximum SCTP message size advertised in the application section.
const MAX_MESSAGE_SIZE: u32 = 1_073_741_823;

/// Opus payload type used in the audio section.
const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Media direction attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl Direction {
    fn parse(attr: &str) -> Option<Self> {
        match attr {
            "sendrecv" => Some(Self::SendRecv),
            "sendonly" => Some(Self::SendOnly),
            "recvonly" => Some(Self::RecvOnly),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    /// The direction the answer advertises for an offered direction.
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::SendOnly => Self::RecvOnly,
            Self::RecvOnly => Self::SendOnly,
            other => other,
        }
    }

    const fn attr(self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }
}

/// One media section of the offer.
#[derive(Debug, Clone)]
pub struct MediaSection {
    pub mid: String,
    pub direction: Direction,
    pub mline_index: u16,
}

/// What the server needs out of an offer.
#[derive(Debug, Clone)]
pub struct OfferView {
    pub audio: Option<MediaSection>,
    pub application: MediaSection,
    pub remote_ufrag: String,
    pub remote_pwd: String,
}

#[derive(PartialEq)]
enum SectionKind {
    None,
    Audio,
    Application,
    Other,
}

/// Extract the sections and credentials the answer needs.
pub fn parse_offer(sdp: &str) -> Result<OfferView, RtcError> {
    let mut audio: Option<MediaSection> = None;
    let mut application: Option<MediaSection> = None;
    let mut ufrag = None;
    let mut pwd = None;

    let mut kind = SectionKind::None;
    let mut mline_index: i32 = -1;
    let mut mid = None;
    let mut direction = Direction::SendRecv;

    fn finish(
        kind: &SectionKind,
        mid: &mut Option<String>,
        direction: Direction,
        index: i32,
        audio: &mut Option<MediaSection>,
        application: &mut Option<MediaSection>,
    ) {
        let Some(mid) = mid.take() else { return };
        let section = MediaSection {
            mid,
            direction,
            mline_index: index as u16,
        };
        match kind {
            SectionKind::Audio if audio.is_none() => *audio = Some(section),
            SectionKind::Application if application.is_none() => *application = Some(section),
            _ => {}
        }
    }

    for raw in sdp.lines() {
        let line = raw.trim_end_matches('\r');
        if let Some(mline) = line.strip_prefix("m=") {
            finish(&kind, &mut mid, direction, mline_index, &mut audio, &mut application);
            mline_index += 1;
            direction = Direction::SendRecv;
            kind = match mline.split(' ').next() {
                Some("audio") => SectionKind::Audio,
                Some("application") => SectionKind::Application,
                _ => SectionKind::Other,
            };
        } else if let Some(value) = line.strip_prefix("a=mid:") {
            mid = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("a=ice-ufrag:") {
            ufrag.get_or_insert_with(|| value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("a=ice-pwd:") {
            pwd.get_or_insert_with(|| value.trim().to_string());
        } else if let Some(attr) = line.strip_prefix("a=") {
            if let Some(parsed) = Direction::parse(attr.trim()) {
                direction = parsed;
            }
        }
    }
    finish(&kind, &mut mid, direction, mline_index, &mut audio, &mut application);

    let application = application.ok_or(RtcError::NoApplicationSection)?;
    let remote_ufrag = ufrag.ok_or_else(|| RtcError::Sdp("missing ice-ufrag".into()))?;
    let remote_pwd = pwd.ok_or_else(|| RtcError::Sdp("missing ice-pwd".into()))?;

    Ok(OfferView {
        audio,
        application,
        remote_ufrag,
        remote_pwd,
    })
}

/// Build the answer for a parsed offer. Pure: same inputs, same bytes.
#[must_use]
pub fn build_answer(offer: &OfferView, ufrag: &str, pwd: &str, fingerprint: &str) -> String {
    // Sections in offer m-line order so BUNDLE indices line up.
    let mut sections: Vec<(&MediaSection, bool)> = Vec::new();
    if let Some(audio) = &offer.audio {
        sections.push((audio, true));
    }
    sections.push((&offer.application, false));
    sections.sort_by_key(|(s, _)| s.mline_index);

    let mut out = String::new();
    out.push_str("v=0\r\n");
    out.push_str("o=- 0 0 IN IP4 0.0.0.0\r\n");
    out.push_str("s=-\r\n");
    out.push_str("t=0 0\r\n");
    out.push_str("a=ice-options:trickle\r\n");
    out.push_str("a=group:BUNDLE");
    for (section, _) in &sections {
        let _ = write!(out, " {}", section.mid);
    }
    out.push_str("\r\n");

    for (section, is_audio) in &sections {
        if *is_audio {
            let _ = write!(out, "m=audio 9 UDP/TLS/RTP/SAVPF {OPUS_PAYLOAD_TYPE}\r\n");
            out.push_str("c=IN IP4 0.0.0.0\r\n");
            let _ = write!(out, "a=mid:{}\r\n", section.mid);
            let _ = write!(out, "a={}\r\n", section.direction.inverted().attr());
            let _ = write!(out, "a=rtpmap:{OPUS_PAYLOAD_TYPE} opus/48000/2\r\n");
            let _ = write!(out, "a=fmtp:{OPUS_PAYLOAD_TYPE} minptime=10;useinbandfec=1\r\n");
            out.push_str("a=rtcp-mux\r\n");
        } else {
            out.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
            out.push_str("c=IN IP4 0.0.0.0\r\n");
            let _ = write!(out, "a=mid:{}\r\n", section.mid);
            let _ = write!(out, "a=sctp-port:{SCTP_PORT}\r\n");
            let _ = write!(out, "a=max-message-size:{MAX_MESSAGE_SIZE}\r\n");
        }
        out.push_str("a=setup:passive\r\n");
        let _ = write!(out, "a=ice-ufrag:{ufrag}\r\n");
        let _ = write!(out, "a=ice-pwd:{pwd}\r\n");
        let _ = write!(out, "a=fingerprint:sha-256 {fingerprint}\r\n");
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = concat!(
        "v=0\r\n",
        "o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n",
        "s=-\r\n",
        "t=0 0\r\n",
        "a=group:BUNDLE 0 1\r\n",
        "a=ice-ufrag:EsAw\r\n",
        "a=ice-pwd:P2uYro0UCOQ4zxjKXaWCBui1\r\n",
        "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n",
        "a=mid:0\r\n",
        "a=sendonly\r\n",
        "a=rtpmap:111 opus/48000/2\r\n",
        "m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
        "a=mid:1\r\n",
        "a=sctp-port:5000\r\n",
    );

    const FP: &str = "AA:BB:CC:DD";

    #[test]
    fn parses_sections_and_credentials() {
        let offer = parse_offer(OFFER).unwrap();
        assert_eq!(offer.remote_ufrag, "EsAw");
        assert_eq!(offer.remote_pwd, "P2uYro0UCOQ4zxjKXaWCBui1");

        let audio = offer.audio.as_ref().unwrap();
        assert_eq!(audio.mid, "0");
        assert_eq!(audio.direction, Direction::SendOnly);
        assert_eq!(audio.mline_index, 0);

        assert_eq!(offer.application.mid, "1");
        assert_eq!(offer.application.mline_index, 1);
    }

    #[test]
    fn application_section_is_required() {
        let audio_only = "v=0\r\na=ice-ufrag:x\r\na=ice-pwd:y\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\n";
        assert!(matches!(
            parse_offer(audio_only),
            Err(RtcError::NoApplicationSection)
        ));
    }

    #[test]
    fn answer_is_deterministic() {
        let offer = parse_offer(OFFER).unwrap();
        let a = build_answer(&offer, "frag", "pass", FP);
        let b = build_answer(&offer, "frag", "pass", FP);
        assert_eq!(a, b);
    }

    #[test]
    fn answer_inverts_direction_and_bundles_in_order() {
        let offer = parse_offer(OFFER).unwrap();
        let answer = build_answer(&offer, "frag", "pass", FP);

        assert!(answer.contains("a=group:BUNDLE 0 1\r\n"));
        // Client sends only, so the server receives only.
        assert!(answer.contains("a=recvonly\r\n"));
        assert!(answer.contains("a=setup:passive\r\n"));
        assert!(answer.contains("a=sctp-port:5000\r\n"));
        assert!(answer.contains("a=max-message-size:1073741823\r\n"));
        assert!(answer.contains("a=ice-ufrag:frag\r\n"));
        assert!(answer.contains(&format!("a=fingerprint:sha-256 {FP}\r\n")));
        // Application-only offers are legal; audio comes after bundle checks.
        assert!(answer.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n"));
    }

    #[test]
    fn sendrecv_and_inactive_are_preserved() {
        assert_eq!(Direction::SendRecv.inverted(), Direction::SendRecv);
        assert_eq!(Direction::Inactive.inverted(), Direction::Inactive);
        assert_eq!(Direction::SendOnly.inverted(), Direction::RecvOnly);
        assert_eq!(Direction::RecvOnly.inverted(), Direction::SendOnly);
    }

    #[test]
    fn data_channel_only_offer() {
        let dc_only = concat!(
            "v=0\r\n",
            "a=ice-ufrag:u\r\n",
            "a=ice-pwd:p\r\n",
            "m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n",
            "a=mid:data\r\n",
        );
        let offer = parse_offer(dc_only).unwrap();
        assert!(offer.audio.is_none());
        let answer = build_answer(&offer, "frag", "pass", FP);
        assert!(answer.contains("a=group:BUNDLE data\r\n"));
        assert!(!answer.contains("m=audio"));
    }
}
