//! # Wire Format
//!
//! Every frame exchanged between peers has the same layout:
//!
//! ```text
//! ┌───────────┬─────────┬─────┬────────────┬──────────────────┐
//! │ magic (4) │ ver (1) │ tag │ length (4) │ payload (bincode)│
//! │  "MRMR"   │         │ (1) │ big-endian │                  │
//! └───────────┴─────────┴─────┴────────────┴──────────────────┘
//! ```
//!
//! | Tag    | Payload                              |
//! |--------|--------------------------------------|
//! | `0x01` | [`Envelope`] carrying a transaction   |
//! | `0x02` | [`Envelope`] carrying a block         |
//! | `0x10` | [`SyncCall`]                          |
//! | `0x11` | [`SyncReply`]                         |
//!
//! Decoding never panics on remote input. Anything malformed comes back as a
//! [`WireError`] and the frame is dropped.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::config::{PROTOCOL_MAGIC, WIRE_PROTOCOL_VERSION};
use crate::network::gossip::{Envelope, Payload};
use crate::network::sync::{SyncCall, SyncReply};

pub const TAG_TRANSACTION: u8 = 0x01;
pub const TAG_BLOCK: u8 = 0x02;
pub const TAG_SYNC_REQUEST: u8 = 0x10;
pub const TAG_SYNC_RESPONSE: u8 = 0x11;

/// magic + version + tag + length.
pub const HEADER_LEN: usize = 10;

/// Largest payload accepted from a peer.
pub const MAX_PAYLOAD_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("frame too short: {0} bytes")]
    Truncated(usize),

    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),

    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown frame tag 0x{0:02x}")]
    UnknownTag(u8),

    #[error("declared payload length {declared} but {actual} bytes follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("payload of {0} bytes exceeds the frame limit")]
    TooLarge(usize),

    #[error("tag 0x{tag:02x} does not match a {kind} payload")]
    TagMismatch { tag: u8, kind: &'static str },

    #[error("serialization failed: {0}")]
    Codec(String),
}

/// Anything that can travel between peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Gossip(Envelope),
    SyncRequest(SyncCall),
    SyncResponse(SyncReply),
}

impl Frame {
    pub fn tag(&self) -> u8 {
        match self {
            Self::Gossip(env) => match env.payload {
                Payload::Transaction(_) => TAG_TRANSACTION,
                Payload::Block(_) => TAG_BLOCK,
            },
            Self::SyncRequest(_) => TAG_SYNC_REQUEST,
            Self::SyncResponse(_) => TAG_SYNC_RESPONSE,
        }
    }
}

/// Encodes a frame into a single contiguous buffer.
pub fn encode(frame: &Frame) -> Result<Bytes, WireError> {
    let payload = match frame {
        Frame::Gossip(env) => to_bytes(env)?,
        Frame::SyncRequest(call) => to_bytes(call)?,
        Frame::SyncResponse(reply) => to_bytes(reply)?,
    };
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(WireError::TooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
    buf.put_slice(&PROTOCOL_MAGIC);
    buf.put_u8(WIRE_PROTOCOL_VERSION);
    buf.put_u8(frame.tag());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Decodes one frame. The buffer must hold exactly one frame.
pub fn decode(mut data: &[u8]) -> Result<Frame, WireError> {
    if data.len() < HEADER_LEN {
        return Err(WireError::Truncated(data.len()));
    }

    let mut magic = [0u8; 4];
    data.copy_to_slice(&mut magic);
    if magic != PROTOCOL_MAGIC {
        return Err(WireError::BadMagic(magic));
    }

    let version = data.get_u8();
    if version != WIRE_PROTOCOL_VERSION {
        return Err(WireError::UnsupportedVersion(version));
    }

    let tag = data.get_u8();
    let declared = data.get_u32() as usize;
    if declared > MAX_PAYLOAD_LEN {
        return Err(WireError::TooLarge(declared));
    }
    if declared != data.remaining() {
        return Err(WireError::LengthMismatch {
            declared,
            actual: data.remaining(),
        });
    }

    match tag {
        TAG_TRANSACTION | TAG_BLOCK => {
            let env: Envelope = from_bytes(data)?;
            let expected = match env.payload {
                Payload::Transaction(_) => TAG_TRANSACTION,
                Payload::Block(_) => TAG_BLOCK,
            };
            if expected != tag {
                return Err(WireError::TagMismatch {
                    tag,
                    kind: env.payload.kind(),
                });
            }
            Ok(Frame::Gossip(env))
        }
        TAG_SYNC_REQUEST => Ok(Frame::SyncRequest(from_bytes(data)?)),
        TAG_SYNC_RESPONSE => Ok(Frame::SyncResponse(from_bytes(data)?)),
        other => Err(WireError::UnknownTag(other)),
    }
}

fn to_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    bincode::serialize(value).map_err(|e| WireError::Codec(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(data: &[u8]) -> Result<T, WireError> {
    bincode::deserialize(data).map_err(|e| WireError::Codec(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Keypair;
    use crate::network::sync::{SyncRequest, SyncResponse};
    use crate::storage::block::Block;
    use crate::transaction::signed_transfer;

    fn tx_frame() -> Frame {
        let kp = Keypair::from_seed(&[1u8; 32]);
        let to = Keypair::from_seed(&[2u8; 32]).address();
        Frame::Gossip(Envelope::new(Payload::Transaction(signed_transfer(&kp, &to, 5, 1))))
    }

    // -- Round trip --

    #[test]
    fn every_frame_kind_survives_the_wire() {
        let frames = vec![
            tx_frame(),
            Frame::Gossip(Envelope::new(Payload::Block(Block::genesis(0, 1, &[])))),
            Frame::SyncRequest(SyncCall {
                request_id: 7,
                request: SyncRequest::PoolDiff { known: vec![] },
            }),
            Frame::SyncResponse(SyncReply {
                request_id: 7,
                response: SyncResponse::Transactions(vec![]),
            }),
        ];
        for frame in frames {
            let bytes = encode(&frame).unwrap();
            assert_eq!(bytes[5], frame.tag());
            assert_eq!(decode(&bytes).unwrap(), frame);
        }
    }

    #[test]
    fn header_layout() {
        let bytes = encode(&tx_frame()).unwrap();
        assert_eq!(&bytes[..4], b"MRMR");
        assert_eq!(bytes[4], WIRE_PROTOCOL_VERSION);
        assert_eq!(bytes[5], TAG_TRANSACTION);
        let len = u32::from_be_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        assert_eq!(len, bytes.len() - HEADER_LEN);
    }

    // -- Rejection --

    #[test]
    fn short_input_is_truncated() {
        assert_eq!(decode(b"MRMR"), Err(WireError::Truncated(4)));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode(&tx_frame()).unwrap().to_vec();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(WireError::BadMagic(_))));
    }

    #[test]
    fn unknown_version_and_tag_are_rejected() {
        let mut bytes = encode(&tx_frame()).unwrap().to_vec();
        bytes[4] = 99;
        assert_eq!(decode(&bytes), Err(WireError::UnsupportedVersion(99)));

        let mut bytes = encode(&tx_frame()).unwrap().to_vec();
        bytes[5] = 0x7f;
        assert_eq!(decode(&bytes), Err(WireError::UnknownTag(0x7f)));
    }

    #[test]
    fn missing_and_trailing_bytes_are_rejected() {
        let bytes = encode(&tx_frame()).unwrap().to_vec();
        assert!(matches!(
            decode(&bytes[..bytes.len() - 1]),
            Err(WireError::LengthMismatch { .. })
        ));

        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(
            decode(&longer),
            Err(WireError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn tag_must_match_payload_kind() {
        let mut bytes = encode(&tx_frame()).unwrap().to_vec();
        bytes[5] = TAG_BLOCK;
        assert_eq!(
            decode(&bytes),
            Err(WireError::TagMismatch {
                tag: TAG_BLOCK,
                kind: "transaction"
            })
        );
    }

    #[test]
    fn garbage_payload_is_a_codec_error() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&PROTOCOL_MAGIC);
        bytes.put_u8(WIRE_PROTOCOL_VERSION);
        bytes.put_u8(TAG_SYNC_REQUEST);
        bytes.put_u32(3);
        bytes.put_slice(&[0xff, 0xff, 0xff]);
        assert!(matches!(decode(&bytes), Err(WireError::Codec(_))));
    }
}
