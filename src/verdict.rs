//! Test verdict and run report.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Line printed for a passing run.
pub const PASSED: &str = "Test passed!";

/// Line printed for a failing run.
pub const FAILED: &str = "Test failed.";

/// Phase in which a deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Running,
}

/// A reason for failing the verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Received packet differs from the expected one at `index`.
    Mismatch { index: usize },
    /// A packet arrived after the expected trace was exhausted.
    ExcessPackets,
    /// The peer closed while expected packets were outstanding.
    PrematureEof { index: usize },
    /// The run ended while expected packets were outstanding.
    MissingPackets { index: usize },
    BrokenPipe,
    ConnectionReset,
    Timeout { phase: Phase, after: Duration },
    /// The program exited with something other than status 0.
    ExitStatus { status: String },
    /// The program exited before the exchange was complete.
    ExitedEarly,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mismatch { index } => write!(f, "packet {index} does not match"),
            Self::ExcessPackets => f.write_str("received more packets than expected"),
            Self::PrematureEof { index } => {
                write!(f, "peer closed the connection while expecting packet {index}")
            }
            Self::MissingPackets { index } => {
                write!(f, "expected packets from index {index} were never received")
            }
            Self::BrokenPipe => f.write_str("broken pipe while sending"),
            Self::ConnectionReset => f.write_str("connection reset by peer"),
            Self::Timeout {
                phase: Phase::Connecting,
                after,
            } => write!(f, "timed out after {after:?} waiting for the connection"),
            Self::Timeout {
                phase: Phase::Running,
                after,
            } => write!(f, "timed out after {after:?} during the packet exchange"),
            Self::ExitStatus { status } => write!(f, "program under test ended with {status}"),
            Self::ExitedEarly => f.write_str("program under test exited before the test completed"),
        }
    }
}

/// Pass/fail state of one run.
///
/// Starts out passing; any recorded failure makes it failed for good.
#[derive(Debug, Default)]
pub struct Verdict {
    failures: Vec<Failure>,
}

impl Verdict {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure cause and log it.
    pub fn fail(&mut self, failure: Failure) {
        tracing::error!("{failure}");
        self.failures.push(failure);
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// Whether `failure` has already been recorded.
    pub fn has(&self, failure: &Failure) -> bool {
        self.failures.contains(failure)
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    pub passed: bool,
    pub causes: Vec<String>,
    pub packets_sent: usize,
    pub packets_received: usize,
    pub packets_matched: usize,
    pub mismatches: usize,
    pub first_mismatch: Option<usize>,
    pub exit_code: Option<i32>,
    pub port: u16,
}

impl Report {
    /// The final one-line verdict.
    pub fn verdict_line(&self) -> &'static str {
        if self.passed {
            PASSED
        } else {
            FAILED
        }
    }

    /// Process exit code of the oracle itself.
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_is_monotonic() {
        let mut verdict = Verdict::new();
        assert!(verdict.passed());

        verdict.fail(Failure::ExcessPackets);
        assert!(!verdict.passed());
        assert!(verdict.has(&Failure::ExcessPackets));
        assert!(!verdict.has(&Failure::BrokenPipe));
        assert_eq!(verdict.failures().len(), 1);
    }

    #[test]
    fn test_failure_messages() {
        assert_eq!(
            Failure::Mismatch { index: 1 }.to_string(),
            "packet 1 does not match"
        );
        let timeout = Failure::Timeout {
            phase: Phase::Connecting,
            after: Duration::from_secs(2),
        };
        assert_eq!(
            timeout.to_string(),
            "timed out after 2s waiting for the connection"
        );
    }

    #[test]
    fn test_report_lines_and_codes() {
        let mut report = Report {
            passed: true,
            ..Report::default()
        };
        assert_eq!(report.verdict_line(), "Test passed!");
        assert_eq!(report.exit_code(), 0);

        report.passed = false;
        assert_eq!(report.verdict_line(), "Test failed.");
        assert_eq!(report.exit_code(), 1);
    }

    #[test]
    fn test_report_serializes() {
        let report = Report {
            passed: false,
            causes: vec!["packet 1 does not match".into()],
            first_mismatch: Some(1),
            ..Report::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["passed"], false);
        assert_eq!(json["first_mismatch"], 1);
        assert_eq!(json["causes"][0], "packet 1 does not match");
    }
}
