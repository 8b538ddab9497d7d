//! Outbound queue for scatter/gather writes.
//!
//! A queued packet contributes two buffers: its 4-byte length prefix and its
//! payload. A cursor records how many bytes of the head buffer have already
//! been flushed, so partial writes resume exactly where they stopped.

use std::collections::VecDeque;
use std::io::IoSlice;

use bytes::Bytes;

use super::wire_format::{encode_header, Packet};

/// Maximum buffers handed to a single vectored write.
const MAX_SLICES: usize = 64;

/// Ordered list of byte buffers awaiting transmission.
///
/// The queue is non-empty only while a send is in progress, and the cursor
/// never exceeds the head buffer's length.
#[derive(Debug, Default)]
pub struct SendQueue {
    buffers: VecDeque<Bytes>,
    cursor: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a packet: length prefix and payload are added together.
    ///
    /// # Panics
    ///
    /// Panics if the payload is longer than `u32::MAX` bytes.
    pub fn push(&mut self, packet: Packet) {
        let length = u32::try_from(packet.len()).expect("packet length fits in u32");
        self.buffers
            .push_back(Bytes::copy_from_slice(&encode_header(length)));
        if !packet.is_empty() {
            self.buffers.push_back(packet);
        }
    }

    /// Slices for the bytes not yet written, head buffer offset by the cursor.
    pub fn slices(&self) -> Vec<IoSlice<'_>> {
        let mut slices = Vec::with_capacity(self.buffers.len().min(MAX_SLICES));
        for (i, buf) in self.buffers.iter().take(MAX_SLICES).enumerate() {
            let start = if i == 0 { self.cursor } else { 0 };
            slices.push(IoSlice::new(&buf[start..]));
        }
        slices
    }

    /// Record that `written` bytes left the queue.
    pub fn advance(&mut self, mut written: usize) {
        while written > 0 {
            let Some(head) = self.buffers.front() else {
                debug_assert!(false, "advanced past the end of the send queue");
                return;
            };
            let left = head.len() - self.cursor;
            if written < left {
                self.cursor += written;
                return;
            }
            written -= left;
            self.buffers.pop_front();
            self.cursor = 0;
        }
    }

    /// Total bytes still to be written.
    pub fn remaining(&self) -> usize {
        self.buffers.iter().map(Bytes::len).sum::<usize>() - self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::HEADER_SIZE;

    fn flatten(queue: &SendQueue) -> Vec<u8> {
        queue.slices().iter().flat_map(|s| s.to_vec()).collect()
    }

    #[test]
    fn test_push_queues_header_and_payload() {
        let mut queue = SendQueue::new();
        queue.push(Bytes::from_static(b"hello"));

        let slices = queue.slices();
        assert_eq!(slices.len(), 2);
        assert_eq!(&slices[0][..], &[0, 0, 0, 5]);
        assert_eq!(&slices[1][..], b"hello");
        assert_eq!(queue.remaining(), HEADER_SIZE + 5);
    }

    #[test]
    fn test_empty_packet_is_header_only() {
        let mut queue = SendQueue::new();
        queue.push(Bytes::new());

        assert_eq!(queue.slices().len(), 1);
        assert_eq!(queue.remaining(), HEADER_SIZE);
    }

    #[test]
    fn test_advance_partial_header() {
        let mut queue = SendQueue::new();
        queue.push(Bytes::from_static(b"hello"));
        queue.advance(3);

        let slices = queue.slices();
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 3);
        assert_eq!(flatten(&queue), [&[5u8][..], b"hello"].concat());
    }

    #[test]
    fn test_advance_into_payload() {
        let mut queue = SendQueue::new();
        queue.push(Bytes::from_static(b"hello"));
        queue.advance(HEADER_SIZE + 2);

        assert_eq!(flatten(&queue), b"llo");
        assert_eq!(queue.remaining(), 3);
    }

    #[test]
    fn test_advance_everything_empties_queue() {
        let mut queue = SendQueue::new();
        queue.push(Bytes::from_static(b"abc"));
        queue.advance(HEADER_SIZE + 3);

        assert!(queue.is_empty());
        assert_eq!(queue.remaining(), 0);
        assert!(queue.slices().is_empty());
    }

    #[test]
    fn test_small_writes_reassemble_the_frame() {
        let mut queue = SendQueue::new();
        queue.push(Bytes::from_static(b"payload"));
        let expected = flatten(&queue);

        let mut written = Vec::new();
        while !queue.is_empty() {
            let chunk: Vec<u8> = flatten(&queue).into_iter().take(2).collect();
            queue.advance(chunk.len());
            written.extend(chunk);
        }
        assert_eq!(written, expected);
    }
}
