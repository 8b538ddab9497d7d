//! Error types for framecheck.

use thiserror::Error;

/// Main error type for all oracle operations.
#[derive(Debug, Error)]
pub enum OracleError {
    /// I/O error during socket, file or process operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (report output only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A data line declared an offset that does not continue the current packet.
    #[error("{path}:{line}: offset {found:#x} does not match {expected:#x} bytes accumulated")]
    OffsetMismatch {
        path: String,
        line: usize,
        expected: usize,
        found: usize,
    },

    /// A trace file could not be opened or read.
    #[error("{path}: {source}")]
    TraceFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// A trace line could not be parsed at all.
    #[error("{path}:{line}: {reason}")]
    MalformedTrace {
        path: String,
        line: usize,
        reason: String,
    },

    /// The peer announced a frame larger than the configured MTU.
    #[error("Protocol error: frame of {length} bytes exceeds MTU of {mtu}")]
    FrameTooLarge { length: u32, mtu: u32 },

    /// A time specification on the command line could not be parsed.
    #[error("invalid time specification `{0}`")]
    InvalidDuration(String),

    /// The peer closed its read side while we were still sending.
    #[error("broken pipe while sending")]
    BrokenPipe,

    /// The peer reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A data operation was attempted before the connection was established
    /// or after it was closed.
    #[error("socket is not connected")]
    NotConnected,

    /// The host name did not resolve to any address.
    #[error("could not resolve {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// The program under test could not be started.
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl OracleError {
    /// Whether this error points at a broken fixture or a protocol violation
    /// rather than a defect of the program under test.
    ///
    /// Fatal errors abort the run; the others are folded into the verdict.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BrokenPipe | Self::ConnectionReset)
    }

    /// One-line message printed when a run ends with this error.
    pub fn diagnostic(&self) -> String {
        if self.is_fatal() {
            format!("error: {self} (run aborted)")
        } else {
            format!("error: {self}")
        }
    }
}

/// Result type alias using OracleError.
pub type Result<T> = std::result::Result<T, OracleError>;
