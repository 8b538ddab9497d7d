//! # framecheck
//!
//! Conformance oracle for programs that exchange packets over a single
//! length-framed TCP stream.
//!
//! The oracle sends the packets of one or more hex-dump traces to the
//! program under test, compares the packets it sends back, in order, against
//! an expected trace, and reports a pass/fail verdict.
//!
//! ## Architecture
//!
//! - **Trace reader** ([`trace`]): lazy hex-dump parsing into packets
//! - **Framed socket** ([`transport`], [`protocol`]): 4-byte big-endian
//!   length prefix plus payload, scatter writes and partial-read assembly
//! - **Orchestrator** ([`orchestrator`]): `connecting → running →
//!   waiting-for-drain → done`, supervising the program via [`supervisor`]
//!
//! ## Example
//!
//! ```ignore
//! use framecheck::{Config, Role};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let config = Config {
//!         input: vec!["requests.txt".into()],
//!         expected: vec!["responses.txt".into()],
//!         role: Role::Listen,
//!         command: vec!["./my-server".into()],
//!         ..Config::default()
//!     };
//!     let report = framecheck::run(config).await.unwrap();
//!     println!("{}", report.verdict_line());
//! }
//! ```

pub mod cli;
pub mod compare;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod supervisor;
pub mod trace;
pub mod transport;
pub mod verdict;

pub use config::{Config, Role};
pub use error::{OracleError, Result};
pub use orchestrator::{run, Orchestrator};
pub use protocol::Packet;
pub use verdict::Report;
