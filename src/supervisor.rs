//! Program-under-test supervision.
//!
//! The program is started as
//! `program [extra args...] <role> <host> <port>` where `<role>` is the side
//! it has to take. Its stdout and stderr share one Unix socket pair so the
//! log stream keeps the program's own interleaving.
//!
//! The oracle only observes the process: it reads the log stream, collects
//! the exit status, and sends signals at shutdown.

use std::io::{self, ErrorKind};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};

use crate::config::Role;
use crate::error::{OracleError, Result};

/// Signals sent at shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
    Kill,
}

impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Interrupt => libc::SIGINT,
            Self::Terminate => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
        }
    }
}

/// A running (or exited) program under test.
#[derive(Debug)]
pub struct PutProcess {
    child: Child,
    command: String,
    status: Option<ExitStatus>,
}

/// Start the program under test.
///
/// `command` is the program followed by its extra arguments; `role`, `host`
/// and `port` are appended.
pub fn spawn(
    command: &[String],
    role: Role,
    host: &str,
    port: u16,
) -> Result<(PutProcess, LogStream<UnixStream>)> {
    let rendered = command.join(" ");
    let Some((program, extra)) = command.split_first() else {
        return Err(OracleError::Spawn {
            command: rendered,
            source: io::Error::new(ErrorKind::InvalidInput, "no program given"),
        });
    };

    let (reader, writer) = StdUnixStream::pair()?;
    let stderr = writer.try_clone()?;

    let mut cmd = Command::new(program);
    cmd.args(extra)
        .arg(role.as_str())
        .arg(host)
        .arg(port.to_string())
        .stdin(Stdio::null())
        .stdout(OwnedFd::from(writer))
        .stderr(OwnedFd::from(stderr))
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| OracleError::Spawn {
        command: rendered.clone(),
        source,
    })?;
    // Our copies of the write end must go, or the log never reaches EOF.
    drop(cmd);

    reader.set_nonblocking(true)?;
    let log = LogStream::new(UnixStream::from_std(reader)?);

    tracing::info!(
        pid = child.id(),
        command = %rendered,
        %role,
        %host,
        port,
        "started program under test"
    );
    Ok((
        PutProcess {
            child,
            command: rendered,
            status: None,
        },
        log,
    ))
}

impl PutProcess {
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Process id while the child has not been reaped.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Exit status, once observed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    pub fn has_exited(&self) -> bool {
        self.status.is_some()
    }

    /// Non-blocking exit check.
    pub fn try_exit(&mut self) -> Result<Option<ExitStatus>> {
        if self.status.is_none() {
            self.status = self.child.try_wait()?;
        }
        Ok(self.status)
    }

    /// Wait for the process to exit. Cancel safe.
    pub async fn wait(&mut self) -> Result<ExitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.status = Some(status);
        Ok(status)
    }

    /// Deliver `signal` unless the process is already gone.
    pub fn signal(&mut self, signal: Signal) -> Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        if signal == Signal::Kill {
            return match self.child.start_kill() {
                Err(e) if e.kind() == ErrorKind::InvalidInput => Ok(()),
                other => Ok(other?),
            };
        }
        let Some(pid) = self.pid() else {
            return Ok(());
        };
        let pid = libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "pid out of range"))?;

        tracing::debug!(pid, ?signal, "signalling program under test");
        // SAFETY: kill(2) takes plain integers; the pid is our own unreaped child.
        if unsafe { libc::kill(pid, signal.as_raw()) } != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() != Some(libc::ESRCH) {
                return Err(err.into());
            }
        }
        Ok(())
    }
}

/// Human readable exit status: `exit code 3` or `signal 2`.
pub fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown status".to_string(),
    }
}

/// Line-oriented transcription of the program's output.
#[derive(Debug)]
pub struct LogStream<R> {
    reader: R,
    buffer: BytesMut,
    lines: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> LogStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(4096),
            lines: 0,
            eof: false,
        }
    }

    /// Whether more output may still arrive.
    pub fn is_open(&self) -> bool {
        !self.eof
    }

    /// Number of lines transcribed so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Read whatever is available and transcribe complete lines. Cancel safe.
    ///
    /// Returns the number of bytes read; 0 means EOF, after which a trailing
    /// partial line is flushed too.
    pub async fn read_some(&mut self) -> Result<usize> {
        self.buffer.reserve(4096);
        let n = self.reader.read_buf(&mut self.buffer).await?;
        if n == 0 {
            self.eof = true;
        }
        self.transcribe();
        Ok(n)
    }

    /// Read until EOF. Only used once the process has exited.
    pub async fn drain(&mut self) -> Result<()> {
        while self.is_open() {
            self.read_some().await?;
        }
        Ok(())
    }

    fn transcribe(&mut self) {
        while let Some(line) = self.next_line() {
            self.lines += 1;
            tracing::info!(target: "put", "{line}");
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let line = match self.buffer.iter().position(|&b| b == b'\n') {
            Some(pos) => self.buffer.split_to(pos + 1),
            None if self.eof && !self.buffer.is_empty() => self.buffer.split(),
            None => return None,
        };
        let text = String::from_utf8_lossy(&line);
        Some(text.trim_end_matches(|c: char| c == '\n' || c == '\r').to_string())
    }
}
