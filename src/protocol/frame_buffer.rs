//! Frame buffer for accumulating partial reads.
//!
//! All received bytes live in one owned `BytesMut`; the valid range is
//! whatever has been read but not yet split off as a packet. The parser is
//! a two-state machine:
//! - `WaitingForHeader`: need the 4-byte length prefix
//! - `WaitingForPayload`: length known, need that many payload bytes
//!
//! # Example
//!
//! ```
//! use framecheck::protocol::{build_frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new(1500);
//! let frame = build_frame(b"hello");
//!
//! assert!(buffer.push(&frame[..3]).unwrap().is_empty());
//! let packets = buffer.push(&frame[3..]).unwrap();
//! assert_eq!(&packets[0][..], b"hello");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{decode_header, Packet, HEADER_SIZE};
use crate::error::{OracleError, Result};

/// Minimum spare capacity offered to each socket read.
const READ_CHUNK: usize = 16 * 1024;

/// State machine for frame parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No partial packet; waiting for a complete length prefix.
    WaitingForHeader,
    /// Length prefix consumed, `length` payload bytes expected.
    WaitingForPayload { length: usize },
}

/// Receive assembly state for one connection.
///
/// A packet is handed out only once fully assembled; bytes are never
/// delivered twice or dropped.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes read from the socket and not yet consumed.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Largest accepted payload.
    mtu: u32,
}

impl FrameBuffer {
    /// Create a frame buffer that rejects frames larger than `mtu`.
    pub fn new(mtu: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
            state: State::WaitingForHeader,
            mtu,
        }
    }

    /// Push data into the buffer and extract all complete packets.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::FrameTooLarge`] if a length prefix exceeds the MTU.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Packet>> {
        self.buffer.extend_from_slice(data);
        self.extract()
    }

    /// Grow the spare capacity so the next read can complete the pending
    /// packet in one go, and return the buffer to read into.
    pub(crate) fn read_target(&mut self) -> &mut BytesMut {
        let wanted = match self.state {
            State::WaitingForHeader => HEADER_SIZE,
            State::WaitingForPayload { length } => length,
        }
        .saturating_sub(self.buffer.len())
        .max(READ_CHUNK);
        self.buffer.reserve(wanted);
        &mut self.buffer
    }

    /// Extract every complete packet currently buffered.
    pub(crate) fn extract(&mut self) -> Result<Vec<Packet>> {
        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract_one()? {
            packets.push(packet);
        }
        Ok(packets)
    }

    fn try_extract_one(&mut self) -> Result<Option<Packet>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    let Some(length) = decode_header(&self.buffer) else {
                        return Ok(None);
                    };
                    if length > self.mtu {
                        return Err(OracleError::FrameTooLarge {
                            length,
                            mtu: self.mtu,
                        });
                    }
                    let _ = self.buffer.split_to(HEADER_SIZE);
                    if length == 0 {
                        return Ok(Some(Bytes::new()));
                    }
                    self.state = State::WaitingForPayload {
                        length: length as usize,
                    };
                }
                State::WaitingForPayload { length } => {
                    if self.buffer.len() < length {
                        return Ok(None);
                    }
                    self.state = State::WaitingForHeader;
                    return Ok(Some(self.buffer.split_to(length).freeze()));
                }
            }
        }
    }

    /// Number of buffered bytes that do not yet form a complete packet.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if no partial data is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Whether bytes of an unfinished frame are held: part of a length prefix,
    /// or a known length whose payload is still incomplete.
    pub fn has_partial_packet(&self) -> bool {
        matches!(self.state, State::WaitingForPayload { .. }) || !self.buffer.is_empty()
    }
}
