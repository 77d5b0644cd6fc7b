//! Payload packing and unpacking helpers
//!
//! All helpers operate on the fixed 8-byte CAN payload buffer. Multi-byte
//! integers on the wire are big-endian.

use snafu::Snafu;

use crate::node_id::NodeId;

/// Errors from payload decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Snafu)]
pub enum CodecError {
    /// The payload is too short to hold the field being decoded
    #[snafu(display("Payload of {len} bytes is too short"))]
    InsufficientPayload {
        /// Length of the payload that was offered
        len: usize,
    },
}

/// Decode a [`NodeId`] from the first four payload bytes
///
/// Fails with [`CodecError::InsufficientPayload`] when fewer than four bytes
/// are present. Callers handling node-scoped frames must drop on this error;
/// callers building broadcast traffic may substitute the master's own ID.
pub fn decode_node_id(payload: &[u8]) -> Result<NodeId, CodecError> {
    if payload.len() < 4 {
        return InsufficientPayloadSnafu { len: payload.len() }.fail();
    }
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&payload[..4]);
    Ok(NodeId::new(bytes))
}

/// Pack up to 8 byte values into a zero-filled 8-byte buffer
pub fn pack_be8(values: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    let n = values.len().min(8);
    buf[..n].copy_from_slice(&values[..n]);
    buf
}

/// Pack a wall-clock time into an epoch broadcast payload
///
/// Bytes 0..3 are zero; bytes 4..7 carry the big-endian unsigned Unix
/// seconds derived from `now_ms`.
pub fn pack_epoch(now_ms: u64) -> [u8; 8] {
    let secs = (now_ms / 1000) as u32;
    let mut buf = [0u8; 8];
    buf[4..8].copy_from_slice(&secs.to_be_bytes());
    buf
}

/// The DLC and save-state flag packed into the final byte of a phase-B
/// sub-module intro
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DlcFlags {
    /// Data length code of the sub-module's data message (low nibble)
    pub dlc: u8,
    /// Whether the sub-module persists its state (bit 7)
    pub save_state: bool,
}

/// Unpack the DLC/save-state byte
pub fn unpack_dlc_flags(b: u8) -> DlcFlags {
    DlcFlags {
        dlc: b & 0x0F,
        save_state: b & 0x80 != 0,
    }
}

/// Assemble a big-endian u16 from its two wire bytes
pub fn assemble_be16(hi: u8, lo: u8) -> u16 {
    ((hi as u16) << 8) | (lo as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_node_id() {
        let id = decode_node_id(&[0x19, 0, 0, 0x19, 0xFF]).unwrap();
        assert_eq!(id.bytes(), [0x19, 0, 0, 0x19]);
        assert_eq!(
            decode_node_id(&[1, 2, 3]),
            Err(CodecError::InsufficientPayload { len: 3 })
        );
    }

    #[test]
    fn test_pack_be8_zero_fills() {
        assert_eq!(pack_be8(&[0xAA, 0xBB]), [0xAA, 0xBB, 0, 0, 0, 0, 0, 0]);
        assert_eq!(pack_be8(&[]), [0u8; 8]);
    }

    #[test]
    fn test_pack_epoch() {
        // 0x12345678 seconds
        let ms = 0x1234_5678u64 * 1000 + 999;
        assert_eq!(pack_epoch(ms), [0, 0, 0, 0, 0x12, 0x34, 0x56, 0x78]);
    }

    #[test]
    fn test_unpack_dlc_flags() {
        let f = unpack_dlc_flags(0x88);
        assert_eq!(f.dlc, 8);
        assert!(f.save_state);
        let f = unpack_dlc_flags(0x04);
        assert_eq!(f.dlc, 4);
        assert!(!f.save_state);
    }

    #[test]
    fn test_assemble_be16() {
        assert_eq!(assemble_be16(0x02, 0x10), 0x0210);
        assert_eq!(assemble_be16(0x00, 0x99), 0x0099);
    }
}
