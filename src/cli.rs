//! Command line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::config::{parse_duration, Config, Role, DEFAULT_HOST};
use crate::protocol::DEFAULT_MTU;

/// Conformance oracle for programs speaking a length-framed TCP protocol.
///
/// Sends the packets of the input traces to the program under test and
/// compares what comes back, in order, with the expected traces.
#[derive(Debug, Parser)]
#[command(name = "framecheck", version)]
#[command(after_help = "The program is started as: PROGRAM [ARGS]... <role> <host> <port>")]
pub struct Cli {
    /// Trace file with packets to send (repeatable, concatenated in order)
    #[arg(short, long = "input", value_name = "FILE", required = true)]
    pub input: Vec<PathBuf>,

    /// Trace file with packets expected back (repeatable)
    #[arg(short, long = "expect", value_name = "FILE", required = true)]
    pub expect: Vec<PathBuf>,

    /// Host to listen on or connect to
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Port to use; 0 picks an ephemeral one
    #[arg(short, long, default_value_t = 0)]
    pub port: u16,

    /// Side of the connection taken by the oracle
    #[arg(long, value_enum, default_value_t = Role::Listen)]
    pub role: Role,

    /// Do not start a program; wait for an externally started peer
    #[arg(long)]
    pub standalone: bool,

    /// Overall deadline, e.g. `10`, `2.5s`, `300ms`
    #[arg(short, long, value_parser = parse_duration, default_value = "10s")]
    pub timeout: Duration,

    /// Grace period after the exchange [default: timeout/10]
    #[arg(short, long, value_parser = parse_duration)]
    pub wait_time: Option<Duration>,

    /// Largest payload accepted from the peer
    #[arg(long, default_value_t = DEFAULT_MTU)]
    pub mtu: u32,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, conflicts_with = "quiet")]
    pub verbose: u8,

    /// Only warnings and errors
    #[arg(short, long)]
    pub quiet: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Program under test and its extra arguments
    #[arg(
        last = true,
        value_name = "PROGRAM",
        required_unless_present = "standalone"
    )]
    pub command: Vec<String>,
}

impl Cli {
    /// Verbosity level for [`crate::logging::init`].
    pub fn verbosity(&self) -> i8 {
        if self.quiet {
            -1
        } else {
            i8::try_from(self.verbose).unwrap_or(i8::MAX)
        }
    }

    pub fn into_config(self) -> Config {
        Config {
            input: self.input,
            expected: self.expect,
            host: self.host,
            port: self.port,
            role: self.role,
            standalone: self.standalone,
            timeout: self.timeout,
            wait_time: self.wait_time,
            mtu: self.mtu,
            command: self.command,
        }
    }
}
