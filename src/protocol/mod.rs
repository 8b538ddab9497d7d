//! Protocol module - wire format, framing, and the outbound queue.
//!
//! This module implements the length-prefixed framing of the data stream:
//! - 4-byte big-endian length prefix encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Send queue for resumable vectored writes

mod frame_buffer;
mod send_queue;
mod wire_format;

pub use frame_buffer::FrameBuffer;
pub use send_queue::SendQueue;
pub use wire_format::{
    build_frame, decode_header, encode_header, Packet, DEFAULT_MTU, HEADER_SIZE,
};
