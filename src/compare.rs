//! In-order comparison of received packets against the expected trace.

use std::fmt::Write as _;

use crate::error::Result;
use crate::protocol::Packet;

/// Bytes per row in [`side_by_side`].
const ROW: usize = 8;

/// Result of checking one received packet.
#[derive(Debug, PartialEq, Eq)]
pub enum Comparison {
    Match,
    /// The packet differs from the expected packet at `index`.
    Mismatch { index: usize, expected: Packet },
    /// The expected trace was already exhausted.
    Excess,
}

/// The next expected packet plus its zero-based index.
///
/// Advances exactly once per received packet while not exhausted.
pub struct ExpectationCursor<E> {
    source: E,
    next: Option<Packet>,
    index: usize,
}

impl<E> ExpectationCursor<E>
where
    E: Iterator<Item = Result<Packet>>,
{
    /// Load the first expected packet.
    pub fn new(mut source: E) -> Result<Self> {
        let next = source.next().transpose()?;
        Ok(Self {
            source,
            next,
            index: 0,
        })
    }

    /// Compare `received` with the next expected packet and advance.
    pub fn check(&mut self, received: &[u8]) -> Result<Comparison> {
        let Some(expected) = self.next.take() else {
            return Ok(Comparison::Excess);
        };
        let index = self.index;
        self.index += 1;
        self.next = self.source.next().transpose()?;

        if expected[..] == *received {
            Ok(Comparison::Match)
        } else {
            Ok(Comparison::Mismatch { index, expected })
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }

    /// Index of the next expected packet.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Two-column hex dump of an expected and a received packet.
///
/// Rows that differ are marked with `*`.
pub fn side_by_side(expected: &[u8], received: &[u8]) -> String {
    let width = ROW * 3 - 1;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "offset    {:<width$}   received ({} bytes)",
        format!("expected ({} bytes)", expected.len()),
        received.len(),
    );

    let rows = expected.len().max(received.len()).div_ceil(ROW);
    for row in 0..rows {
        let start = row * ROW;
        let left = chunk(expected, start);
        let right = chunk(received, start);
        let marker = if left == right { ' ' } else { '*' };
        let _ = writeln!(
            out,
            "{start:08x}  {:<width$} | {:<width$} {marker}",
            hex_row(left),
            hex_row(right),
        );
    }
    out
}

fn chunk(data: &[u8], start: usize) -> &[u8] {
    let end = (start + ROW).min(data.len());
    data.get(start..end).unwrap_or_default()
}

fn hex_row(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| hex::encode([*b]))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn cursor(packets: &[&'static str]) -> ExpectationCursor<impl Iterator<Item = Result<Packet>>> {
        let packets: Vec<Packet> = packets
            .iter()
            .map(|p| Bytes::from_static(p.as_bytes()))
            .collect();
        ExpectationCursor::new(packets.into_iter().map(Ok)).unwrap()
    }

    #[test]
    fn test_all_match() {
        let mut c = cursor(&["A", "B", "C"]);
        for p in [b"A", b"B", b"C"] {
            assert_eq!(c.check(p).unwrap(), Comparison::Match);
        }
        assert!(c.is_exhausted());
        assert_eq!(c.index(), 3);
    }

    #[test]
    fn test_mismatch_reports_index() {
        let mut c = cursor(&["A", "B", "C"]);
        assert_eq!(c.check(b"A").unwrap(), Comparison::Match);
        assert_eq!(
            c.check(b"X").unwrap(),
            Comparison::Mismatch {
                index: 1,
                expected: Bytes::from_static(b"B")
            }
        );
        assert_eq!(c.check(b"C").unwrap(), Comparison::Match);
        assert!(c.is_exhausted());
    }

    #[test]
    fn test_excess_after_exhaustion() {
        let mut c = cursor(&["A"]);
        assert_eq!(c.check(b"A").unwrap(), Comparison::Match);
        assert_eq!(c.check(b"B").unwrap(), Comparison::Excess);
        assert_eq!(c.index(), 1);
    }

    #[test]
    fn test_empty_expected_trace() {
        let c = cursor(&[]);
        assert!(c.is_exhausted());
    }

    #[test]
    fn test_side_by_side_marks_differing_rows() {
        let expected: Vec<u8> = (0u8..10).collect();
        let mut received = expected.clone();
        received[9] = 0xff;

        let dump = side_by_side(&expected, &received);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("expected (10 bytes)"));
        assert!(lines[1].starts_with("00000000  00 01 02 03 04 05 06 07 | 00 01"));
        assert!(lines[1].ends_with(' '));
        assert!(lines[2].starts_with("00000008  08 09"));
        assert!(lines[2].contains("08 ff"));
        assert!(lines[2].ends_with('*'));
    }

    #[test]
    fn test_side_by_side_length_difference() {
        let dump = side_by_side(b"abc", b"");
        assert!(dump.lines().nth(1).unwrap().ends_with('*'));
    }
}
