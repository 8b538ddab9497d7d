//! Run configuration.
//!
//! A [`Config`] is built once (usually by the command line layer) and handed
//! to the orchestrator, which never mutates it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OracleError, Result};
use crate::protocol::DEFAULT_MTU;

/// Default overall timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default host for both roles.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Which side of the TCP connection the oracle takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Role {
    /// Bind, listen and accept one inbound connection.
    #[default]
    Listen,
    /// Connect out, retrying until the peer is listening.
    Connect,
}

impl Role {
    /// The role the program under test has to take.
    pub fn opposite(self) -> Self {
        match self {
            Self::Listen => Self::Connect,
            Self::Connect => Self::Listen,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Listen => "listen",
            Self::Connect => "connect",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable configuration of one oracle run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Trace files whose packets are sent, in order.
    pub input: Vec<PathBuf>,
    /// Trace files whose packets are expected back, in order.
    pub expected: Vec<PathBuf>,
    pub host: String,
    /// Port to listen on or connect to; 0 picks an ephemeral port.
    pub port: u16,
    pub role: Role,
    /// Do not spawn a program under test; the peer is started elsewhere.
    pub standalone: bool,
    /// Overall deadline for the whole exchange.
    pub timeout: Duration,
    /// Grace period after the exchange; `None` means a tenth of `timeout`.
    pub wait_time: Option<Duration>,
    /// Largest payload accepted from the peer.
    pub mtu: u32,
    /// Program under test followed by its extra arguments.
    pub command: Vec<String>,
}

impl Config {
    /// Effective post-completion grace period.
    pub fn wait_time(&self) -> Duration {
        self.wait_time.unwrap_or(self.timeout / 10)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input: Vec::new(),
            expected: Vec::new(),
            host: DEFAULT_HOST.to_string(),
            port: 0,
            role: Role::default(),
            standalone: false,
            timeout: DEFAULT_TIMEOUT,
            wait_time: None,
            mtu: DEFAULT_MTU,
            command: Vec::new(),
        }
    }
}

/// Parse a time specification such as `10`, `2.5s`, `300ms` or `1m`.
///
/// Bare numbers are seconds.
///
/// # Errors
///
/// Returns [`OracleError::InvalidDuration`] for anything else, including
/// negative or non-finite values.
pub fn parse_duration(spec: &str) -> Result<Duration> {
    let invalid = || OracleError::InvalidDuration(spec.to_string());
    let trimmed = spec.trim();

    let (number, scale) = if let Some(n) = trimmed.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1.0)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60.0)
    } else {
        (trimmed, 1.0)
    };

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    Duration::try_from_secs_f64(value * scale).map_err(|_| invalid())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("2.5s").unwrap(), Duration::from_millis(2500));
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_duration(" 0 ").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        for spec in ["", "s", "ten", "-1", "1h", "NaN", "inf"] {
            assert!(
                matches!(parse_duration(spec), Err(OracleError::InvalidDuration(_))),
                "{spec:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_wait_time_defaults_to_a_tenth() {
        let config = Config {
            timeout: Duration::from_secs(5),
            ..Config::default()
        };
        assert_eq!(config.wait_time(), Duration::from_millis(500));

        let config = Config {
            wait_time: Some(Duration::from_secs(1)),
            ..config
        };
        assert_eq!(config.wait_time(), Duration::from_secs(1));
    }

    #[test]
    fn test_role_opposite() {
        assert_eq!(Role::Listen.opposite(), Role::Connect);
        assert_eq!(Role::Connect.opposite(), Role::Listen);
        assert_eq!(Role::Connect.to_string(), "connect");
    }
}
