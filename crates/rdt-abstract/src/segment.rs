//! Wire format shared by the Go-Back-N and Selective-Repeat engines.
//!
//! ```text
//!  0        1                                   1 + len
//! +--------+-----------------------------------+
//! |  ctrl  |  payload (0..=1024 bytes)         |
//! +--------+-----------------------------------+
//! ```
//!
//! Byte 0 is either a sequence number or one of the two handshake control
//! values in [`control`]. Sequence numbers never reach the control values, so
//! a single byte is enough to tell them apart. A one-byte datagram carrying a
//! sequence number means "ACK" when it travels towards the responder and
//! "end of stream" when it travels towards the receiver, which is why
//! [`Segment::decode`] needs to know the reading side.

use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use thiserror::Error;

/// Control values reserved for the two-byte handshake.
pub mod control {
    /// Responder → receiver: "are you ready?"
    pub const HANDSHAKE: u8 = 205;
    /// Receiver → responder: "ready, start sending".
    pub const HANDSHAKE_ACK: u8 = 200;
}

/// Largest payload carried by a single data segment.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// Receive buffer size. One byte larger than the biggest segment we emit.
pub const DATAGRAM_BUFFER_LEN: usize = 1026;

/// Which endpoint is decoding the datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    /// The sending side reads ACKs and the handshake ack.
    AtResponder,
    /// The receiving side reads data, end markers and the handshake probe.
    AtReceiver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Handshake,
    HandshakeAck,
    Data { seq: u8, payload: Bytes },
    Ack { seq: u8 },
    /// Zero-payload segment: end marker (GBN) or end request / echo (SR).
    End { seq: u8 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SegmentError {
    #[error("empty datagram")]
    Empty,
    #[error("payload of {len} bytes exceeds the segment limit")]
    TooLong { len: usize },
    #[error("responder received a payload-bearing segment (seq {seq})")]
    UnexpectedData { seq: u8 },
}

impl Segment {
    pub fn data(seq: u8, payload: impl Into<Bytes>) -> Self {
        Segment::Data {
            seq,
            payload: payload.into(),
        }
    }

    /// Sequence number carried by the segment, if any.
    pub fn seq(&self) -> Option<u8> {
        match self {
            Segment::Data { seq, .. } | Segment::Ack { seq } | Segment::End { seq } => Some(*seq),
            Segment::Handshake | Segment::HandshakeAck => None,
        }
    }

    /// Serialise into a datagram of exactly `1 + payload.len()` bytes.
    ///
    /// Fails only when a data payload is longer than [`MAX_PAYLOAD_LEN`].
    pub fn encode(&self) -> Result<Bytes, SegmentError> {
        let bytes = match self {
            Segment::Handshake => Bytes::from_static(&[control::HANDSHAKE]),
            Segment::HandshakeAck => Bytes::from_static(&[control::HANDSHAKE_ACK]),
            Segment::Ack { seq } | Segment::End { seq } => Bytes::copy_from_slice(&[*seq]),
            Segment::Data { seq, payload } => {
                if payload.len() > MAX_PAYLOAD_LEN {
                    return Err(SegmentError::TooLong { len: payload.len() });
                }
                let mut buf = BytesMut::with_capacity(1 + payload.len());
                buf.put_u8(*seq);
                buf.put_slice(payload);
                buf.freeze()
            }
        };
        Ok(bytes)
    }

    /// Parse a received datagram from the point of view of `inbound`.
    pub fn decode(datagram: &[u8], inbound: Inbound) -> Result<Self, SegmentError> {
        let (&ctrl, payload) = datagram.split_first().ok_or(SegmentError::Empty)?;
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(SegmentError::TooLong { len: payload.len() });
        }

        if payload.is_empty() {
            return Ok(match (ctrl, inbound) {
                (control::HANDSHAKE, _) => Segment::Handshake,
                (control::HANDSHAKE_ACK, _) => Segment::HandshakeAck,
                (seq, Inbound::AtResponder) => Segment::Ack { seq },
                (seq, Inbound::AtReceiver) => Segment::End { seq },
            });
        }

        match inbound {
            Inbound::AtReceiver => Ok(Segment::Data {
                seq: ctrl,
                payload: Bytes::copy_from_slice(payload),
            }),
            Inbound::AtResponder => Err(SegmentError::UnexpectedData { seq: ctrl }),
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Handshake => write!(f, "HANDSHAKE"),
            Segment::HandshakeAck => write!(f, "HANDSHAKE-ACK"),
            Segment::Data { seq, payload } => write!(f, "DATA seq={seq} <{} bytes>", payload.len()),
            Segment::Ack { seq } => write!(f, "ACK {seq}"),
            Segment::End { seq } => write!(f, "END seq={seq}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_is_one_control_byte() {
        assert_eq!(Segment::Handshake.encode().unwrap().as_ref(), &[205]);
        assert_eq!(Segment::HandshakeAck.encode().unwrap().as_ref(), &[200]);
    }

    #[test]
    fn one_byte_datagram_depends_on_reader() {
        assert_eq!(
            Segment::decode(&[7], Inbound::AtResponder),
            Ok(Segment::Ack { seq: 7 })
        );
        assert_eq!(
            Segment::decode(&[7], Inbound::AtReceiver),
            Ok(Segment::End { seq: 7 })
        );
    }

    #[test]
    fn control_values_decode_on_both_sides() {
        for inbound in [Inbound::AtResponder, Inbound::AtReceiver] {
            assert_eq!(Segment::decode(&[205], inbound), Ok(Segment::Handshake));
            assert_eq!(Segment::decode(&[200], inbound), Ok(Segment::HandshakeAck));
        }
    }

    #[test]
    fn data_segment_has_exact_length() {
        let encoded = Segment::data(3, &b"abc"[..]).encode().unwrap();
        assert_eq!(encoded.as_ref(), b"\x03abc");
        assert_eq!(
            Segment::decode(&encoded, Inbound::AtReceiver),
            Ok(Segment::data(3, &b"abc"[..]))
        );
    }

    #[test]
    fn payload_may_contain_zero_bytes() {
        let payload = vec![0u8, 1, 0, 2];
        let encoded = Segment::data(1, payload.clone()).encode().unwrap();
        match Segment::decode(&encoded, Inbound::AtReceiver).unwrap() {
            Segment::Data { payload: got, .. } => assert_eq!(got.as_ref(), payload.as_slice()),
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn empty_datagram_is_rejected() {
        assert_eq!(
            Segment::decode(&[], Inbound::AtReceiver),
            Err(SegmentError::Empty)
        );
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let too_long = vec![1u8; MAX_PAYLOAD_LEN + 1];
        assert_eq!(
            Segment::data(1, too_long).encode(),
            Err(SegmentError::TooLong {
                len: MAX_PAYLOAD_LEN + 1
            })
        );
        let datagram = vec![1u8; MAX_PAYLOAD_LEN + 2];
        assert!(matches!(
            Segment::decode(&datagram, Inbound::AtReceiver),
            Err(SegmentError::TooLong { .. })
        ));
    }

    #[test]
    fn responder_refuses_payloads() {
        assert_eq!(
            Segment::decode(b"\x04xyz", Inbound::AtResponder),
            Err(SegmentError::UnexpectedData { seq: 4 })
        );
    }
}
