//! Data Channel Establishment Protocol.
//!
//! DCEP control messages ride SCTP with PPID 50. The client opens channels
//! with OPEN; the server acknowledges with ACK and treats the stream as a
//! live data channel from then on.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::error::RtcError;

/// SCTP payload protocol identifiers used on data channels.
pub mod ppid {
    pub const DCEP: u32 = 50;
    pub const STRING: u32 = 51;
    pub const BINARY: u32 = 53;
    pub const BINARY_EMPTY: u32 = 56;
    pub const STRING_EMPTY: u32 = 57;
}

const MESSAGE_TYPE_ACK: u8 = 0x02;
const MESSAGE_TYPE_OPEN: u8 = 0x03;

/// Channel-type bit marking an unordered channel.
const CHANNEL_TYPE_UNORDERED_BIT: u8 = 0x80;

/// A parsed DCEP OPEN message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcepOpen {
    pub channel_type: u8,
    pub priority: u16,
    pub reliability_parameter: u32,
    pub label: String,
    pub protocol: String,
}

impl DcepOpen {
    /// Whether messages on this channel may be delivered out of order.
    #[must_use]
    pub const fn is_unordered(&self) -> bool {
        self.channel_type & CHANNEL_TYPE_UNORDERED_BIT != 0
    }

    /// Parse an OPEN: `[0x03, channelType, priority:u16, reliability:u32,
    /// labelLen:u16, protocolLen:u16, label, protocol]`, big-endian.
    pub fn parse(data: &[u8]) -> Result<Self, RtcError> {
        let mut buf = data;
        if buf.remaining() < 12 {
            return Err(RtcError::Dcep("OPEN truncated".into()));
        }
        let message_type = buf.get_u8();
        if message_type != MESSAGE_TYPE_OPEN {
            return Err(RtcError::Dcep(format!(
                "expected OPEN (0x03), got {message_type:#04x}"
            )));
        }
        let channel_type = buf.get_u8();
        let priority = buf.get_u16();
        let reliability_parameter = buf.get_u32();
        let label_len = buf.get_u16() as usize;
        let protocol_len = buf.get_u16() as usize;

        if buf.remaining() < label_len + protocol_len {
            return Err(RtcError::Dcep("OPEN label/protocol truncated".into()));
        }
        let label = String::from_utf8(buf.copy_to_bytes(label_len).to_vec())
            .map_err(|_| RtcError::Dcep("label is not UTF-8".into()))?;
        let protocol = String::from_utf8(buf.copy_to_bytes(protocol_len).to_vec())
            .map_err(|_| RtcError::Dcep("protocol is not UTF-8".into()))?;

        Ok(Self {
            channel_type,
            priority,
            reliability_parameter,
            label,
            protocol,
        })
    }

    /// Encode an OPEN. The server never opens channels in this design; this
    /// exists for tests and symmetry with `parse`.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12 + self.label.len() + self.protocol.len());
        buf.put_u8(MESSAGE_TYPE_OPEN);
        buf.put_u8(self.channel_type);
        buf.put_u16(self.priority);
        buf.put_u32(self.reliability_parameter);
        buf.put_u16(self.label.len() as u16);
        buf.put_u16(self.protocol.len() as u16);
        buf.put_slice(self.label.as_bytes());
        buf.put_slice(self.protocol.as_bytes());
        buf.freeze()
    }
}

/// The single-byte ACK reply.
#[must_use]
pub fn ack() -> Bytes {
    Bytes::from_static(&[MESSAGE_TYPE_ACK])
}

/// Whether a DCEP message is an ACK (relevant only for server-opened
/// channels).
#[must_use]
pub fn is_ack(data: &[u8]) -> bool {
    data.first() == Some(&MESSAGE_TYPE_ACK)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> DcepOpen {
        DcepOpen {
            channel_type: 0x82,
            priority: 256,
            reliability_parameter: 3,
            label: "audio".into(),
            protocol: String::new(),
        }
    }

    #[test]
    fn open_round_trip() {
        let msg = open();
        let parsed = DcepOpen::parse(&msg.encode()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn unordered_bit() {
        assert!(open().is_unordered());
        let ordered = DcepOpen {
            channel_type: 0x00,
            ..open()
        };
        assert!(!ordered.is_unordered());
    }

    #[test]
    fn wire_layout_is_big_endian() {
        let encoded = open().encode();
        assert_eq!(encoded[0], 0x03);
        assert_eq!(encoded[1], 0x82);
        assert_eq!(&encoded[2..4], &256u16.to_be_bytes());
        assert_eq!(&encoded[4..8], &3u32.to_be_bytes());
        assert_eq!(&encoded[8..10], &5u16.to_be_bytes());
        assert_eq!(&encoded[10..12], &0u16.to_be_bytes());
        assert_eq!(&encoded[12..], b"audio");
    }

    #[test]
    fn rejects_truncated_and_wrong_type() {
        assert!(DcepOpen::parse(&[0x03, 0x00]).is_err());
        assert!(DcepOpen::parse(&ack()).is_err());

        let mut cut = open().encode().to_vec();
        cut.truncate(cut.len() - 1);
        assert!(DcepOpen::parse(&cut).is_err());
    }

    #[test]
    fn ack_is_single_byte() {
        assert_eq!(ack().as_ref(), &[0x02]);
        assert!(is_ack(&ack()));
    }
}
