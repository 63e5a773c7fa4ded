//! Wire format encoding and decoding.
//!
//! Implements the 14-byte header format:
//! ```text
//! ┌─────────┬──────────┬──────────┬────────┐
//! │ Version │ Length   │ Tag      │ Marker │
//! │ 1 byte  │ 4 bytes  │ 8 bytes  │ 1 byte │
//! │ = 1     │ u32 LE   │ f64 LE   │ = 30   │
//! └─────────┴──────────┴──────────┴────────┘
//! ```
//!
//! All multi-byte fields are Little Endian. The correlation tag is a
//! non-negative integer carried in an IEEE-754 double; the tag allocator
//! never issues values anywhere near the 2^53 exactness limit, so the
//! round-trip is lossless.

use crate::error::{JoedbError, Result};

/// Header size in bytes (fixed, exactly 14).
pub const HEADER_SIZE: usize = 14;

/// Protocol version carried in the first header byte.
pub const PROTOCOL_VERSION: u8 = 1;

/// Terminator byte closing every header.
pub const FRAME_MARKER: u8 = 30;

/// Default maximum payload size (1 GB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 1_073_741_824;

/// Largest tag value the f64 field can carry exactly.
pub const MAX_TAG: u64 = 1 << 53;

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    /// Correlation tag pairing this frame with a pending request.
    pub tag: u64,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(tag: u64, payload_length: u32) -> Self {
        Self {
            tag,
            payload_length,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (14 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        debug_assert!(self.tag < MAX_TAG);
        buf[0] = PROTOCOL_VERSION;
        buf[1..5].copy_from_slice(&self.payload_length.to_le_bytes());
        buf[5..13].copy_from_slice(&(self.tag as f64).to_le_bytes());
        buf[13] = FRAME_MARKER;
    }

    /// Decode header from bytes.
    ///
    /// Returns `None` if the buffer holds fewer than `HEADER_SIZE` bytes,
    /// and an error if the bytes are not a well-formed header (the stream
    /// is desynchronized in that case).
    pub fn decode(buf: &[u8]) -> Result<Option<Self>> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        if buf[0] != PROTOCOL_VERSION {
            return Err(JoedbError::Protocol(format!(
                "Unsupported protocol version {}",
                buf[0]
            )));
        }
        if buf[13] != FRAME_MARKER {
            return Err(JoedbError::Protocol(format!(
                "Bad frame marker byte {:#04x}",
                buf[13]
            )));
        }

        let payload_length = u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]);

        let raw_tag = f64::from_le_bytes([
            buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11], buf[12],
        ]);
        if !raw_tag.is_finite() || raw_tag < 0.0 || raw_tag.fract() != 0.0 {
            return Err(JoedbError::Protocol(format!(
                "Correlation tag {} is not a non-negative integer",
                raw_tag
            )));
        }

        Ok(Some(Self {
            tag: raw_tag as u64,
            payload_length,
        }))
    }
}

/// Build a complete frame (header + payload) as a byte vector.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&header.encode());
    bytes.extend_from_slice(payload);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(42, 100);
        let encoded = original.encode();
        let decoded = Header::decode(&encoded).unwrap().unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_little_endian_layout() {
        let header = Header::new(3, 0x0102_0304);
        let bytes = header.encode();

        assert_eq!(bytes[0], PROTOCOL_VERSION);

        // Payload length 0x01020304 in LE.
        assert_eq!(bytes[1], 0x04);
        assert_eq!(bytes[2], 0x03);
        assert_eq!(bytes[3], 0x02);
        assert_eq!(bytes[4], 0x01);

        // Tag 3.0 as an LE double.
        assert_eq!(&bytes[5..13], &3.0f64.to_le_bytes());

        assert_eq!(bytes[13], FRAME_MARKER);
    }

    #[test]
    fn test_header_size_is_exactly_14() {
        assert_eq!(HEADER_SIZE, 14);
        let header = Header::new(1, 0);
        assert_eq!(header.encode().len(), 14);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; 13]; // One byte short
        assert!(Header::decode(&buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let mut bytes = Header::new(1, 0).encode();
        bytes[0] = 9;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_decode_rejects_bad_marker() {
        let mut bytes = Header::new(1, 0).encode();
        bytes[13] = 0xFF;
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("marker"));
    }

    #[test]
    fn test_decode_rejects_fractional_tag() {
        let mut bytes = Header::new(1, 0).encode();
        bytes[5..13].copy_from_slice(&1.5f64.to_le_bytes());
        let err = Header::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("tag"));
    }

    #[test]
    fn test_decode_rejects_negative_tag() {
        let mut bytes = Header::new(1, 0).encode();
        bytes[5..13].copy_from_slice(&(-4.0f64).to_le_bytes());
        assert!(Header::decode(&bytes).is_err());
    }

    #[test]
    fn test_large_tag_roundtrips() {
        // Well above any realistic ceiling, still exact in an f64.
        let header = Header::new(9_007_000_000_000, 7);
        let decoded = Header::decode(&header.encode()).unwrap().unwrap();
        assert_eq!(decoded.tag, 9_007_000_000_000);
    }

    #[test]
    fn test_build_frame_layout() {
        let header = Header::new(5, 3);
        let frame = build_frame(&header, b"abc");
        assert_eq!(frame.len(), HEADER_SIZE + 3);
        assert_eq!(&frame[HEADER_SIZE..], b"abc");
    }
}
