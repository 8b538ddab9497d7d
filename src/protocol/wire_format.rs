//! Wire format encoding and decoding.
//!
//! Every packet travels as one frame:
//! ```text
//! ┌──────────┬──────────────────┐
//! │ Length   │ Payload          │
//! │ 4 bytes  │ Length bytes     │
//! │ uint32 BE│                  │
//! └──────────┴──────────────────┘
//! ```
//!
//! There is no other framing metadata.

use bytes::{BufMut, Bytes, BytesMut};

/// Length prefix size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Default maximum accepted payload size.
pub const DEFAULT_MTU: u32 = 65_535;

/// A single packet: an immutable byte sequence.
pub type Packet = Bytes;

/// Encode a length prefix (Big Endian).
///
/// # Example
///
/// ```
/// use framecheck::protocol::encode_header;
///
/// assert_eq!(encode_header(258), [0, 0, 1, 2]);
/// ```
#[inline]
pub fn encode_header(payload_length: u32) -> [u8; HEADER_SIZE] {
    payload_length.to_be_bytes()
}

/// Decode a length prefix (Big Endian).
///
/// Returns `None` if the buffer is too short.
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<u32> {
    let bytes: [u8; HEADER_SIZE] = buf.get(..HEADER_SIZE)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes))
}

/// Build a complete frame (length prefix + payload) as a single buffer.
///
/// # Panics
///
/// Panics if the payload is longer than `u32::MAX` bytes.
pub fn build_frame(payload: &[u8]) -> Bytes {
    let length = u32::try_from(payload.len()).expect("payload length fits in u32");
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u32(length);
    buf.extend_from_slice(payload);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_is_big_endian() {
        assert_eq!(encode_header(0x0102_0304), [1, 2, 3, 4]);
        assert_eq!(decode_header(&[1, 2, 3, 4]), Some(0x0102_0304));
    }

    #[test]
    fn test_decode_header_too_short() {
        assert_eq!(decode_header(&[0, 0, 1]), None);
    }

    #[test]
    fn test_decode_header_ignores_trailing_bytes() {
        assert_eq!(decode_header(&[0, 0, 0, 5, 0xaa, 0xbb]), Some(5));
    }

    #[test]
    fn test_build_frame() {
        let frame = build_frame(b"abc");
        assert_eq!(&frame[..], &[0, 0, 0, 3, b'a', b'b', b'c']);
        assert_eq!(&build_frame(b"")[..], &[0, 0, 0, 0]);
    }
}
