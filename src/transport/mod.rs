//! Transport module - the framed TCP connection to the program under test.
//!
//! Provides one non-blocking endpoint that is either:
//! - a listener accepting a single inbound connection
//! - a connector retrying until the peer listens

mod framed;

pub use framed::{Connect, FramedSocket, Receive, SendStatus};
