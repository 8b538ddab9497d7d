//! Test orchestration.
//!
//! The orchestrator owns every piece of run state and walks one explicit
//! state machine:
//!
//! ```text
//! Connecting ──► Running ──► WaitingForDrain ──► Done
//!      │            │                             ▲
//!      └────────────┴── timeout / program exit ───┘
//! ```
//!
//! Each phase is a single-threaded `select!` loop over socket readiness, the
//! program's log stream, its exit, and an absolute deadline. Every ready
//! source is drained fully before waiting again.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::net::UnixStream;
use tokio::time::{sleep_until, Instant};

use crate::compare::{side_by_side, Comparison, ExpectationCursor};
use crate::config::Config;
use crate::error::{OracleError, Result};
use crate::protocol::Packet;
use crate::supervisor::{self, describe_status, LogStream, PutProcess, Signal};
use crate::trace::TraceReader;
use crate::transport::{Connect, FramedSocket, Receive, SendStatus};
use crate::verdict::{Failure, Phase, Report, Verdict};

/// Delay between refused connection attempts.
const CONNECT_RETRY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outbound {
    /// Packets (or queued bytes) remain to be sent.
    Sending,
    /// The input trace is exhausted and flushed, or sending was abandoned.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connecting,
    Running(Outbound),
    /// Exchange complete; absorbing trailing traffic until the instant given.
    WaitingForDrain(Instant),
    Done,
}

#[derive(Debug, Default)]
struct Stats {
    sent: usize,
    received: usize,
    matched: usize,
    mismatches: usize,
    first_mismatch: Option<usize>,
}

/// Drives one request/response conversation with the program under test.
pub struct Orchestrator<I, E> {
    config: Config,
    input: I,
    expected: ExpectationCursor<E>,
    socket: FramedSocket,
    process: Option<PutProcess>,
    log: Option<LogStream<UnixStream>>,
    verdict: Verdict,
    stats: Stats,
    state: State,
    deadline: Instant,
}

/// Run the oracle with the trace files named in `config`.
pub async fn run(config: Config) -> Result<Report> {
    let input = TraceReader::new(config.input.clone());
    let expected = TraceReader::new(config.expected.clone());
    Orchestrator::new(config, input, expected).await?.run().await
}

impl<I, E> Orchestrator<I, E>
where
    I: Iterator<Item = Result<Packet>>,
    E: Iterator<Item = Result<Packet>>,
{
    /// Open the socket and load the first expected packet.
    ///
    /// Nothing is spawned until [`run`](Self::run).
    pub async fn new(config: Config, input: I, expected: E) -> Result<Self> {
        let socket =
            FramedSocket::open(config.role, &config.host, config.port, config.mtu).await?;
        let expected = ExpectationCursor::new(expected)?;
        let deadline = Instant::now() + config.timeout;

        Ok(Self {
            config,
            input,
            expected,
            socket,
            process: None,
            log: None,
            verdict: Verdict::new(),
            stats: Stats::default(),
            state: State::Connecting,
            deadline,
        })
    }

    /// Port the peer has to use.
    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    /// Run the conversation to completion and report the verdict.
    ///
    /// # Errors
    ///
    /// Only fatal conditions (malformed traces, oversized frames, spawn or
    /// socket setup failures) are returned as errors; everything else ends up
    /// in the report.
    pub async fn run(mut self) -> Result<Report> {
        self.deadline = Instant::now() + self.config.timeout;

        if !self.config.standalone {
            let (process, log) = supervisor::spawn(
                &self.config.command,
                self.config.role.opposite(),
                &self.config.host,
                self.socket.port(),
            )?;
            self.process = Some(process);
            self.log = Some(log);
        }

        while self.state != State::Done {
            let next = match self.state {
                State::Connecting => self.connect().await?,
                State::Running(outbound) => self.exchange(outbound).await?,
                State::WaitingForDrain(until) => self.drain(until).await?,
                State::Done => State::Done,
            };
            tracing::debug!(from = ?self.state, to = ?next, "state change");
            self.state = next;
        }

        self.shutdown().await?;
        Ok(self.report())
    }

    async fn connect(&mut self) -> Result<State> {
        let mut retry_at = None;
        loop {
            tokio::select! {
                biased;
                status = wait_exit(&mut self.process), if self.put_running() => {
                    self.on_exit(status?, true);
                    return Ok(State::Done);
                }
                n = read_log(&mut self.log), if self.log_open() => {
                    n?;
                }
                attempt = establish_after(&mut self.socket, retry_at) => match attempt? {
                    Connect::Established => {
                        tracing::info!("connection established");
                        return Ok(State::Running(Outbound::Sending));
                    }
                    Connect::NotYet => retry_at = Some(Instant::now() + CONNECT_RETRY),
                },
                _ = sleep_until(self.deadline) => {
                    self.verdict.fail(Failure::Timeout {
                        phase: Phase::Connecting,
                        after: self.config.timeout,
                    });
                    return Ok(State::Done);
                }
            }
        }
    }

    async fn exchange(&mut self, mut outbound: Outbound) -> Result<State> {
        loop {
            if !self.socket.is_established() {
                outbound = Outbound::Finished;
            }
            if outbound == Outbound::Finished
                && (self.expected.is_exhausted() || self.socket.peer_closed())
            {
                let wait = self.config.wait_time();
                tracing::info!(?wait, "exchange complete, waiting for trailing traffic");
                return Ok(State::WaitingForDrain(Instant::now() + wait));
            }

            let reading = !self.socket.peer_closed();
            let writing = outbound == Outbound::Sending;
            tokio::select! {
                biased;
                ready = self.socket.readable(), if reading => {
                    ready?;
                    self.on_readable()?;
                }
                ready = self.socket.writable(), if writing => {
                    ready?;
                    outbound = self.on_writable()?;
                }
                n = read_log(&mut self.log), if self.log_open() => {
                    n?;
                }
                status = wait_exit(&mut self.process), if self.put_running() => {
                    self.on_exit(status?, true);
                    return Ok(State::Done);
                }
                _ = sleep_until(self.deadline) => {
                    self.verdict.fail(Failure::Timeout {
                        phase: Phase::Running,
                        after: self.config.timeout,
                    });
                    return Ok(State::Done);
                }
            }
        }
    }

    /// Absorb trailing packets until `until`. After peer EOF, keep waiting
    /// for the program to exit on its own so it is never signalled mid-exit.
    async fn drain(&mut self, until: Instant) -> Result<State> {
        loop {
            let reading = !self.socket.peer_closed();
            if !reading && !self.put_running() {
                return Ok(State::Done);
            }
            tokio::select! {
                biased;
                ready = self.socket.readable(), if reading => {
                    ready?;
                    self.on_readable()?;
                }
                n = read_log(&mut self.log), if self.log_open() => {
                    n?;
                }
                status = wait_exit(&mut self.process), if self.put_running() => {
                    self.on_exit(status?, false);
                    return Ok(State::Done);
                }
                _ = sleep_until(until) => return Ok(State::Done),
            }
        }
    }

    /// Stop the program, collect its exit status and the rest of its output.
    async fn shutdown(&mut self) -> Result<()> {
        let wait = self.config.wait_time();

        let exited = match self.process.as_mut() {
            Some(process) if !process.has_exited() => process.try_exit()?,
            _ => None,
        };
        if let Some(status) = exited {
            self.on_exit(status, false);
        }

        if self.put_running() {
            if self.verdict.passed() {
                self.signal_put(Signal::Interrupt)?;
                if !self.await_exit(wait).await? {
                    tracing::warn!("program under test ignored SIGINT, sending SIGTERM");
                    self.signal_put(Signal::Terminate)?;
                }
            } else {
                self.signal_put(Signal::Terminate)?;
            }

            if self.put_running() && !self.await_exit(wait).await? {
                tracing::warn!("program under test ignored SIGTERM, killing it");
                self.signal_put(Signal::Kill)?;
                let status = wait_exit(&mut self.process).await?;
                self.on_exit(status, false);
            }
        }

        if let Some(log) = self.log.as_mut() {
            // A leftover grandchild can hold the log open indefinitely.
            match tokio::time::timeout(wait, log.drain()).await {
                Ok(drained) => {
                    drained?;
                    tracing::debug!(lines = log.lines(), "program output drained");
                }
                Err(_) => {
                    tracing::warn!(?wait, "program output still open after exit, giving up on it");
                }
            }
        }
        self.socket.close();

        if !self.expected.is_exhausted() {
            let index = self.expected.index();
            if !self.verdict.has(&Failure::PrematureEof { index }) {
                self.verdict.fail(Failure::MissingPackets { index });
            }
        }
        Ok(())
    }

    /// Wait up to `limit` for the program to exit, transcribing its output.
    async fn await_exit(&mut self, limit: Duration) -> Result<bool> {
        let until = Instant::now() + limit;
        loop {
            tokio::select! {
                biased;
                status = wait_exit(&mut self.process) => {
                    self.on_exit(status?, false);
                    return Ok(true);
                }
                n = read_log(&mut self.log), if self.log_open() => {
                    n?;
                }
                _ = sleep_until(until) => return Ok(false),
            }
        }
    }

    fn signal_put(&mut self, signal: Signal) -> Result<()> {
        match self.process.as_mut() {
            Some(process) => process.signal(signal),
            None => Ok(()),
        }
    }

    fn on_readable(&mut self) -> Result<()> {
        loop {
            match self.socket.receive() {
                Ok(Receive::Packets(packets)) => {
                    for packet in packets {
                        self.on_packet(packet)?;
                    }
                }
                Ok(Receive::WouldBlock) => return Ok(()),
                Ok(Receive::Eof) => {
                    tracing::info!("peer closed the connection");
                    if !self.expected.is_exhausted() {
                        self.verdict.fail(Failure::PrematureEof {
                            index: self.expected.index(),
                        });
                    }
                    return Ok(());
                }
                Err(OracleError::ConnectionReset) => {
                    self.verdict.fail(Failure::ConnectionReset);
                    return Ok(());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn on_packet(&mut self, packet: Packet) -> Result<()> {
        self.stats.received += 1;
        match self.expected.check(&packet)? {
            Comparison::Match => {
                self.stats.matched += 1;
                tracing::debug!(
                    index = self.expected.index() - 1,
                    length = packet.len(),
                    "packet matches"
                );
            }
            Comparison::Mismatch { index, expected } => {
                self.stats.mismatches += 1;
                if self.stats.first_mismatch.is_none() {
                    self.stats.first_mismatch = Some(index);
                    tracing::error!(
                        "packet {index} differs from the expected packet:\n{}",
                        side_by_side(&expected, &packet)
                    );
                    self.verdict.fail(Failure::Mismatch { index });
                } else {
                    tracing::warn!(
                        index,
                        expected = expected.len(),
                        received = packet.len(),
                        "packet does not match"
                    );
                }
            }
            Comparison::Excess => {
                if !self.verdict.has(&Failure::ExcessPackets) {
                    self.verdict.fail(Failure::ExcessPackets);
                }
                tracing::warn!(length = packet.len(), "unexpected extra packet");
            }
        }
        Ok(())
    }

    /// Flush queued bytes and feed packets from the input trace until the
    /// socket stops accepting data or the trace runs out.
    fn on_writable(&mut self) -> Result<Outbound> {
        let mut next = None;
        loop {
            match self.socket.send(next.take()) {
                Ok(SendStatus::Ready) => {}
                Ok(SendStatus::NotReady) => return Ok(Outbound::Sending),
                Err(OracleError::BrokenPipe) => {
                    self.verdict.fail(Failure::BrokenPipe);
                    return Ok(Outbound::Finished);
                }
                Err(e) => return Err(e),
            }

            match self.input.next().transpose()? {
                Some(packet) => {
                    tracing::debug!(index = self.stats.sent, length = packet.len(), "sending packet");
                    self.stats.sent += 1;
                    next = Some(packet);
                }
                None => {
                    tracing::info!(packets = self.stats.sent, "all packets sent");
                    return Ok(Outbound::Finished);
                }
            }
        }
    }

    fn on_exit(&mut self, status: ExitStatus, early: bool) {
        tracing::info!(
            command = self.process.as_ref().map_or("", PutProcess::command),
            status = %describe_status(status),
            "program under test exited"
        );
        if early {
            self.verdict.fail(Failure::ExitedEarly);
        }
        if !status.success() {
            self.verdict.fail(Failure::ExitStatus {
                status: describe_status(status),
            });
        }
    }

    fn put_running(&self) -> bool {
        self.process.as_ref().is_some_and(|p| !p.has_exited())
    }

    fn log_open(&self) -> bool {
        self.log.as_ref().is_some_and(LogStream::is_open)
    }

    fn report(&self) -> Report {
        Report {
            passed: self.verdict.passed(),
            causes: self.verdict.failures().iter().map(ToString::to_string).collect(),
            packets_sent: self.stats.sent,
            packets_received: self.stats.received,
            packets_matched: self.stats.matched,
            mismatches: self.stats.mismatches,
            first_mismatch: self.stats.first_mismatch,
            exit_code: self
                .process
                .as_ref()
                .and_then(PutProcess::exit_status)
                .and_then(|s| s.code()),
            port: self.socket.port(),
        }
    }
}

async fn wait_exit(process: &mut Option<PutProcess>) -> Result<ExitStatus> {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

async fn read_log(log: &mut Option<LogStream<UnixStream>>) -> Result<usize> {
    match log {
        Some(log) => log.read_some().await,
        None => std::future::pending().await,
    }
}

async fn establish_after(socket: &mut FramedSocket, retry_at: Option<Instant>) -> Result<Connect> {
    if let Some(at) = retry_at {
        sleep_until(at).await;
    }
    socket.establish().await
}
