//! Data-channel audio payload codec.
//!
//! Binary messages on the WebRTC data channel carry one audio frame each,
//! prefixed with a versioned header naming the (obfuscated) sender and
//! optional proximity/gain metadata:
//!
//! - v1: `[ver=1][senderLen:u8][sender][pcm…]`
//! - v2: `[ver=2][senderLen:u8][sender][distance:f32 BE][maxRange:f32 BE][pcm…]`
//! - v3: `[ver=3][senderLen:u8][flags:u8][sender][proximity?][gain?][opus…]`
//!
//! v3 flags: `0x01` proximity (distance + maxRange) present, `0x02` gain
//! present. Floats are IEEE-754 32-bit big-endian. Frames are never
//! fragmented; anything larger than [`MAX_PAYLOAD_BYTES`] is rejected.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard ceiling for header + audio bytes in a single data-channel message.
pub const MAX_PAYLOAD_BYTES: usize = 900;

const VERSION_PCM: u8 = 1;
const VERSION_PCM_PROXIMITY: u8 = 2;
const VERSION_OPUS: u8 = 3;

const FLAG_PROXIMITY: u8 = 0x01;
const FLAG_GAIN: u8 = 0x02;

/// Audio codecs carried over the data channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    /// 48 kHz mono 16-bit signed little-endian samples.
    Pcm,
    /// 48 kHz stereo opus frames, passed through untouched.
    Opus,
}

impl fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcm => f.write_str("pcm"),
            Self::Opus => f.write_str("opus"),
        }
    }
}

impl FromStr for AudioCodec {
    type Err = PayloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pcm" => Ok(Self::Pcm),
            "opus" => Ok(Self::Opus),
            other => Err(PayloadError::UnknownCodec(other.to_string())),
        }
    }
}

/// Errors from encoding or decoding an audio payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("sender token exceeds 255 bytes ({0})")]
    SenderTooLong(usize),
    #[error("payload of {size} bytes exceeds the {MAX_PAYLOAD_BYTES}-byte limit")]
    Oversize { size: usize },
    #[error("payload truncated")]
    Truncated,
    #[error("unknown payload version {0}")]
    UnknownVersion(u8),
    #[error("sender token is not valid UTF-8")]
    InvalidSender,
    #[error("unknown audio codec {0:?}")]
    UnknownCodec(String),
}

/// One in-flight audio frame, ready for encoding onto a data channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioPayload {
    /// Obfuscated sender token (`p_` + 4 hex chars).
    pub sender: String,
    pub codec: AudioCodec,
    /// `(distance, max_range)` proximity metadata, when radar data is sent.
    pub proximity: Option<(f32, f32)>,
    /// Post-decode gain for opus recipients. Never set for PCM, where gain
    /// is applied to the samples before encoding.
    pub gain: Option<f32>,
    /// Codec bytes: PCM samples or one opus frame.
    pub audio: Bytes,
}

impl AudioPayload {
    /// Size of the header this payload will encode with.
    fn header_len(&self) -> usize {
        match self.codec {
            AudioCodec::Pcm => {
                // version + senderLen + sender [+ distance + maxRange]
                2 + self.sender.len() + if self.proximity.is_some() { 8 } else { 0 }
            }
            AudioCodec::Opus => {
                3 + self.sender.len()
                    + if self.proximity.is_some() { 8 } else { 0 }
                    + if self.gain.is_some() { 4 } else { 0 }
            }
        }
    }

    /// Encode into a single data-channel message.
    pub fn encode(&self) -> Result<Bytes, PayloadError> {
        if self.sender.len() > u8::MAX as usize {
            return Err(PayloadError::SenderTooLong(self.sender.len()));
        }
        let total = self.header_len() + self.audio.len();
        if total > MAX_PAYLOAD_BYTES {
            return Err(PayloadError::Oversize { size: total });
        }

        let mut buf = BytesMut::with_capacity(total);
        match self.codec {
            AudioCodec::Pcm => {
                if let Some((distance, max_range)) = self.proximity {
                    buf.put_u8(VERSION_PCM_PROXIMITY);
                    buf.put_u8(self.sender.len() as u8);
                    buf.put_slice(self.sender.as_bytes());
                    buf.put_f32(distance);
                    buf.put_f32(max_range);
                } else {
                    buf.put_u8(VERSION_PCM);
                    buf.put_u8(self.sender.len() as u8);
                    buf.put_slice(self.sender.as_bytes());
                }
            }
            AudioCodec::Opus => {
                let mut flags = 0u8;
                if self.proximity.is_some() {
                    flags |= FLAG_PROXIMITY;
                }
                if self.gain.is_some() {
                    flags |= FLAG_GAIN;
                }
                buf.put_u8(VERSION_OPUS);
                buf.put_u8(self.sender.len() as u8);
                buf.put_u8(flags);
                buf.put_slice(self.sender.as_bytes());
                if let Some((distance, max_range)) = self.proximity {
                    buf.put_f32(distance);
                    buf.put_f32(max_range);
                }
                if let Some(gain) = self.gain {
                    buf.put_f32(gain);
                }
            }
        }
        buf.put_slice(&self.audio);
        Ok(buf.freeze())
    }

    /// Decode a data-channel message. Used by clients and by tests.
    pub fn decode(mut buf: Bytes) -> Result<Self, PayloadError> {
        if buf.remaining() < 2 {
            return Err(PayloadError::Truncated);
        }
        let version = buf.get_u8();
        let sender_len = buf.get_u8() as usize;

        let read_sender = |buf: &mut Bytes| -> Result<String, PayloadError> {
            if buf.remaining() < sender_len {
                return Err(PayloadError::Truncated);
            }
            let raw = buf.split_to(sender_len);
            String::from_utf8(raw.to_vec()).map_err(|_| PayloadError::InvalidSender)
        };

        match version {
            VERSION_PCM => {
                let sender = read_sender(&mut buf)?;
                Ok(Self {
                    sender,
                    codec: AudioCodec::Pcm,
                    proximity: None,
                    gain: None,
                    audio: buf,
                })
            }
            VERSION_PCM_PROXIMITY => {
                let sender = read_sender(&mut buf)?;
                if buf.remaining() < 8 {
                    return Err(PayloadError::Truncated);
                }
                let distance = buf.get_f32();
                let max_range = buf.get_f32();
                Ok(Self {
                    sender,
                    codec: AudioCodec::Pcm,
                    proximity: Some((distance, max_range)),
                    gain: None,
                    audio: buf,
                })
            }
            VERSION_OPUS => {
                if buf.remaining() < 1 {
                    return Err(PayloadError::Truncated);
                }
                let flags = buf.get_u8();
                let sender = read_sender(&mut buf)?;
                let proximity = if flags & FLAG_PROXIMITY != 0 {
                    if buf.remaining() < 8 {
                        return Err(PayloadError::Truncated);
                    }
                    Some((buf.get_f32(), buf.get_f32()))
                } else {
                    None
                };
                let gain = if flags & FLAG_GAIN != 0 {
                    if buf.remaining() < 4 {
                        return Err(PayloadError::Truncated);
                    }
                    Some(buf.get_f32())
                } else {
                    None
                };
                Ok(Self {
                    sender,
                    codec: AudioCodec::Opus,
                    proximity,
                    gain,
                    audio: buf,
                })
            }
            other => Err(PayloadError::UnknownVersion(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(codec: AudioCodec, audio_len: usize) -> AudioPayload {
        AudioPayload {
            sender: "p_4f2a".to_string(),
            codec,
            proximity: None,
            gain: None,
            audio: Bytes::from(vec![0x55; audio_len]),
        }
    }

    #[test]
    fn v1_layout() {
        let encoded = payload(AudioCodec::Pcm, 4).encode().unwrap();
        assert_eq!(encoded[0], 1);
        assert_eq!(encoded[1] as usize, "p_4f2a".len());
        assert_eq!(&encoded[2..8], b"p_4f2a");
        assert_eq!(&encoded[8..], &[0x55; 4]);
    }

    #[test]
    fn v2_floats_are_big_endian() {
        let mut p = payload(AudioCodec::Pcm, 0);
        p.proximity = Some((10.0, 30.0));
        let encoded = p.encode().unwrap();
        assert_eq!(encoded[0], 2);
        assert_eq!(&encoded[8..12], &10.0f32.to_be_bytes());
        assert_eq!(&encoded[12..16], &30.0f32.to_be_bytes());
    }

    #[test]
    fn v3_flags() {
        let mut p = payload(AudioCodec::Opus, 2);
        p.proximity = Some((5.0, 48.0));
        p.gain = Some(0.75);
        let encoded = p.encode().unwrap();
        assert_eq!(encoded[0], 3);
        assert_eq!(encoded[2], 0x03);
        let decoded = AudioPayload::decode(encoded).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn round_trip_all_versions() {
        for p in [
            payload(AudioCodec::Pcm, 16),
            {
                let mut p = payload(AudioCodec::Pcm, 16);
                p.proximity = Some((1.5, 20.0));
                p
            },
            payload(AudioCodec::Opus, 16),
        ] {
            let decoded = AudioPayload::decode(p.encode().unwrap()).unwrap();
            assert_eq!(decoded, p);
        }
    }

    #[test]
    fn oversize_boundary() {
        // v1 header is 2 + sender bytes.
        let header = 2 + "p_4f2a".len();
        let fits = payload(AudioCodec::Pcm, MAX_PAYLOAD_BYTES - header);
        assert!(fits.encode().is_ok());

        let too_big = payload(AudioCodec::Pcm, MAX_PAYLOAD_BYTES - header + 1);
        assert!(matches!(
            too_big.encode(),
            Err(PayloadError::Oversize { size }) if size == MAX_PAYLOAD_BYTES + 1
        ));
    }

    #[test]
    fn sender_token_length_cap() {
        let mut p = payload(AudioCodec::Pcm, 0);
        p.sender = "x".repeat(256);
        assert!(matches!(p.encode(), Err(PayloadError::SenderTooLong(256))));
    }

    #[test]
    fn truncated_and_unknown_version() {
        assert!(matches!(
            AudioPayload::decode(Bytes::from_static(&[1])),
            Err(PayloadError::Truncated)
        ));
        assert!(matches!(
            AudioPayload::decode(Bytes::from_static(&[9, 0, 0])),
            Err(PayloadError::UnknownVersion(9))
        ));
    }
}
