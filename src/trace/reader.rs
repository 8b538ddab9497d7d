//! Hex-dump trace parser.
//!
//! Line rules, checked in order:
//! 1. blank lines and `#` comments are ignored
//! 2. a timestamp line (`<num>-<num>-<num> ...`) closes the current packet
//! 3. `<hex offset> <hex byte>*` appends bytes; the offset must equal the
//!    number of bytes already accumulated, and offset 0 on a non-empty packet
//!    starts a new one
//!
//! Whatever is left at end of input is the last packet.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use bytes::BytesMut;

use crate::error::{OracleError, Result};
use crate::protocol::Packet;

/// Lazy packet iterator over a single hex-dump source.
///
/// Stops after the first error.
pub struct TraceParser<R> {
    reader: R,
    name: String,
    line: usize,
    pending: BytesMut,
    done: bool,
}

impl<R: BufRead> TraceParser<R> {
    /// Parse `reader`; `name` is used in error messages.
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            reader,
            name: name.into(),
            line: 0,
            pending: BytesMut::new(),
            done: false,
        }
    }

    fn take_pending(&mut self) -> Option<Packet> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending.split().freeze())
        }
    }

    fn parse_line(&mut self, text: &str) -> Result<Option<Packet>> {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(None);
        }
        if is_timestamp(text) {
            return Ok(self.take_pending());
        }

        let mut tokens = text.split_whitespace();
        let offset_token = tokens.next().unwrap_or_default();
        let offset = usize::from_str_radix(offset_token, 16)
            .map_err(|_| self.malformed(format!("`{offset_token}` is not a hex offset")))?;

        let emitted = if offset == 0 { self.take_pending() } else { None };
        if offset != self.pending.len() {
            return Err(OracleError::OffsetMismatch {
                path: self.name.clone(),
                line: self.line,
                expected: self.pending.len(),
                found: offset,
            });
        }

        for token in tokens {
            let bytes = hex::decode(token)
                .map_err(|e| self.malformed(format!("`{token}` is not hex: {e}")))?;
            self.pending.extend_from_slice(&bytes);
        }
        Ok(emitted)
    }

    fn malformed(&self, reason: String) -> OracleError {
        OracleError::MalformedTrace {
            path: self.name.clone(),
            line: self.line,
            reason,
        }
    }
}

impl<R: BufRead> Iterator for TraceParser<R> {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut raw = Vec::new();
        while !self.done {
            raw.clear();
            match self.reader.read_until(b'\n', &mut raw) {
                Ok(0) => {
                    self.done = true;
                    return self.take_pending().map(Ok);
                }
                Ok(_) => {}
                Err(source) => {
                    self.done = true;
                    return Some(Err(OracleError::TraceFile {
                        path: self.name.clone(),
                        source,
                    }));
                }
            }
            self.line += 1;

            match self.parse_line(&String::from_utf8_lossy(&raw)) {
                Ok(Some(packet)) => return Some(Ok(packet)),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// `<num>-<num>-<num>` as the first word, e.g. `2024-03-01 12:00:00.5`.
///
/// The word may stand alone; hex offsets never contain `-`.
fn is_timestamp(line: &str) -> bool {
    let Some(word) = line.split_whitespace().next() else {
        return false;
    };
    let parts: Vec<&str> = word.split('-').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
}

/// Packets from several trace files, concatenated in order.
///
/// Each file is parsed independently; files are opened only when the
/// previous one is exhausted.
pub struct TraceReader {
    paths: VecDeque<PathBuf>,
    current: Option<TraceParser<BufReader<File>>>,
    failed: bool,
}

impl TraceReader {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
            current: None,
            failed: false,
        }
    }

    fn open_next(&mut self) -> Option<Result<()>> {
        let path = self.paths.pop_front()?;
        let name = path.display().to_string();
        tracing::debug!(trace = %name, "opening trace file");
        match File::open(&path) {
            Ok(file) => {
                self.current = Some(TraceParser::new(BufReader::new(file), name));
                Some(Ok(()))
            }
            Err(source) => Some(Err(OracleError::TraceFile { path: name, source })),
        }
    }
}

impl Iterator for TraceReader {
    type Item = Result<Packet>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(parser) = self.current.as_mut() {
                match parser.next() {
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    Some(packet) => return Some(packet),
                    None => self.current = None,
                }
            }
            match self.open_next()? {
                Ok(()) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn parse(text: &str) -> Result<Vec<Packet>> {
        TraceParser::new(Cursor::new(text.to_string()), "test").collect()
    }

    #[test]
    fn test_contiguous_lines_form_one_packet() {
        let packets = parse("00000000 aa bb\n00000002 cc dd\n").unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], &[0xaa, 0xbb, 0xcc, 0xdd]);
    }

    #[test]
    fn test_timestamp_splits_packets() {
        let text = "\
2024-01-01 00:00:00.000
00000000 01 02
2024-01-01 00:00:00.100
00000000 03
";
        let packets = parse(text).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][..], &[1, 2]);
        assert_eq!(&packets[1][..], &[3]);
    }

    #[test]
    fn test_offset_zero_is_an_implicit_boundary() {
        let packets = parse("0000 01 02\n0000 03\n0001 04\n").unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][..], &[1, 2]);
        assert_eq!(&packets[1][..], &[3, 4]);
    }

    #[test]
    fn test_out_of_order_offset_is_fatal() {
        let err = parse("0000 01 02\n0003 04\n").unwrap_err();
        assert!(matches!(
            err,
            OracleError::OffsetMismatch {
                line: 2,
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_comments_and_blank_lines_are_ignored() {
        let packets = parse("# header\n\n   \n0000 ff\n# trailer\n").unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], &[0xff]);
    }

    #[test]
    fn test_offset_line_without_bytes() {
        let packets = parse("0000\n0000 aa\n").unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], &[0xaa]);
    }

    #[test]
    fn test_timestamp_without_pending_bytes_is_noop() {
        let packets = parse("2024-01-01 x\n2024-01-01 y\n0000 01\n").unwrap();
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_bare_date_line_is_a_boundary() {
        let packets = parse("0000 01
2024-01-02   
0000 02
2024-01-03
").unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(&packets[0][..], &[1]);
        assert_eq!(&packets[1][..], &[2]);
    }

    #[test]
    fn test_bad_hex_byte_is_reported_with_line() {
        let err = parse("0000 01\n0001 zz\n").unwrap_err();
        assert!(matches!(err, OracleError::MalformedTrace { line: 2, .. }));
    }

    #[test]
    fn test_parser_stops_after_error() {
        let mut parser = TraceParser::new(Cursor::new("0000 01\n0005 02\n0000 03\n"), "t");
        assert!(parser.next().unwrap().is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn test_is_timestamp() {
        assert!(is_timestamp("2024-01-02 10:00"));
        assert!(is_timestamp("2024-01-02"));
        assert!(!is_timestamp("2024-01"));
        assert!(!is_timestamp("0000 aa bb"));
        assert!(!is_timestamp("20-24 aa"));
    }

    #[test]
    fn test_reader_concatenates_files_independently() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.txt");
        let second = dir.path().join("b.txt");
        // The first file ends mid-packet; state must not leak into the second.
        writeln!(File::create(&first).unwrap(), "0000 01 02\n0002 03").unwrap();
        writeln!(File::create(&second).unwrap(), "0000 04\n2000-1-1 t\n0000 05").unwrap();

        let packets: Vec<Packet> = TraceReader::new([first, second])
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[0][..], &[1, 2, 3]);
        assert_eq!(&packets[1][..], &[4]);
        assert_eq!(&packets[2][..], &[5]);
    }

    #[test]
    fn test_reader_missing_file() {
        let mut reader = TraceReader::new([PathBuf::from("/nonexistent/trace.txt")]);
        assert!(matches!(
            reader.next(),
            Some(Err(OracleError::TraceFile { .. }))
        ));
        assert!(reader.next().is_none());
    }
}
