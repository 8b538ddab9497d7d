//! Trace module - packet sequences read from hex-dump fixtures.
//!
//! A trace is finite and single-pass: packets are produced lazily and the
//! sequence cannot be restarted.

mod reader;

pub use reader::{TraceParser, TraceReader};
