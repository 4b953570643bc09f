//! iperf session runner.
//!
//! The server runs in the background while one reader thread per output
//! stream appends cleaned lines to the shared [`LogBuffer`]. The client
//! blocks the caller for at most the invocation's wait budget and is
//! killed when it overruns; whatever it printed is still logged.

use std::io::{self, BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use wifibench_common::{IperfMetrics, IperfRole};
use wifibench_transport::process::{wait_with_timeout, ProcessExit, ProcessHandle};
use wifibench_transport::{Transport, TransportError};

use crate::invocation::IperfInvocation;
use crate::log_buffer::LogBuffer;
use crate::parser::{self, LogParser};

/// How long reader threads get to drain after their process is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

const SUMMARY_POLL: Duration = Duration::from_millis(100);

/// A run that never produced measurable output.
///
/// The aggregator treats every variant as a transient connect failure.
#[derive(Debug, Error)]
pub enum RunFault {
    #[error("could not start iperf {role} '{command}': {source}")]
    Start {
        role: IperfRole,
        command: String,
        #[source]
        source: TransportError,
    },
    #[error("{target} did not answer iperf client '{command}'")]
    NoReply { target: String, command: String },
    #[error("io error while running iperf: {0}")]
    Io(#[from] io::Error),
}

/// How a blocking client run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientExit {
    /// `None` for Telnet-driven runs, which report no exit status.
    pub exit: Option<ProcessExit>,
    pub timed_out: bool,
}

// ── Server handle ───────────────────────────────────────────────────

/// A background iperf server and its reader threads.
///
/// Dropping the handle terminates the server.
pub struct ServerHandle {
    process: Box<dyn ProcessHandle>,
    readers: Vec<JoinHandle<()>>,
    label: String,
    terminated: bool,
}

impl ServerHandle {
    pub fn is_running(&mut self) -> bool {
        !self.terminated && matches!(self.process.try_wait(), Ok(None))
    }

    /// Kill the server and wait briefly for its readers to drain.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        if let Err(e) = self.process.kill() {
            tracing::warn!(label = %self.label, error = %e, "failed to kill iperf server");
        }
        join_readers(std::mem::take(&mut self.readers), READER_GRACE, &self.label);
        tracing::debug!(label = %self.label, "iperf server terminated");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ── Runner ──────────────────────────────────────────────────────────

/// Launches iperf through a [`Transport`] and owns the server log.
#[derive(Debug, Clone, Default)]
pub struct IperfRunner {
    log: LogBuffer,
}

impl IperfRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    /// Start a server in the background. The log is cleared first.
    pub fn start_server(
        &self,
        transport: &mut dyn Transport,
        command: &str,
    ) -> Result<ServerHandle, RunFault> {
        self.log.clear();
        let label = format!("{} server", transport.name());
        let mut process = transport.spawn(command).map_err(|source| RunFault::Start {
            role: IperfRole::Server,
            command: command.to_string(),
            source,
        })?;

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = process.take_stdout() {
            readers.push(spawn_reader(stdout, format!("{label} stdout"), Some(self.log.clone()))?);
        }
        if let Some(stderr) = process.take_stderr() {
            readers.push(spawn_reader(stderr, format!("{label} stderr"), Some(self.log.clone()))?);
        }
        tracing::info!(label = %label, command, pid = ?process.id(), "iperf server started");

        Ok(ServerHandle {
            process,
            readers,
            label,
            terminated: false,
        })
    }

    /// Run a client to completion within the invocation's wait budget.
    pub fn run_client(
        &self,
        transport: &mut dyn Transport,
        invocation: &IperfInvocation,
    ) -> Result<ClientExit, RunFault> {
        self.run_client_within(transport, invocation, invocation.wait_time())
    }

    /// [`IperfRunner::run_client`] with an explicit budget.
    pub fn run_client_within(
        &self,
        transport: &mut dyn Transport,
        invocation: &IperfInvocation,
        wait: Duration,
    ) -> Result<ClientExit, RunFault> {
        let label = format!("{} client", transport.name());
        let command = invocation.command.as_str();
        tracing::info!(label = %label, command, wait_s = wait.as_secs(), "iperf client starting");

        if transport.prefers_execute() {
            let Some(output) = transport.execute(command, Some(wait)) else {
                return Err(RunFault::NoReply {
                    target: transport.name().to_string(),
                    command: command.to_string(),
                });
            };
            for line in output.lines().map(parser::sanitize_line).filter(|l| !l.is_empty()) {
                tracing::debug!(label = %label, "{line}");
            }
            return Ok(ClientExit {
                exit: None,
                timed_out: false,
            });
        }

        let mut process = transport.spawn(command).map_err(|source| RunFault::Start {
            role: IperfRole::Client,
            command: command.to_string(),
            source,
        })?;
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = process.take_stdout() {
            readers.push(spawn_reader(stdout, format!("{label} stdout"), None)?);
        }
        if let Some(stderr) = process.take_stderr() {
            readers.push(spawn_reader(stderr, format!("{label} stderr"), None)?);
        }

        let mut exit = wait_with_timeout(process.as_mut(), wait)?;
        let timed_out = exit.is_none();
        if timed_out {
            tracing::warn!(label = %label, wait_s = wait.as_secs(), "iperf client overran its wait time, killing");
            process.kill()?;
            exit = process.try_wait()?;
        }
        join_readers(readers, READER_GRACE, &label);
        tracing::info!(label = %label, code = ?exit.and_then(|e| e.code), timed_out, "iperf client finished");

        Ok(ClientExit { exit, timed_out })
    }

    /// Give a streaming server a moment to print its final report.
    ///
    /// Polls for up to `clamp(0.1 * t, 1, 5)` seconds. Returns whether
    /// the report (or `t` distinct `[SUM]` intervals) showed up.
    pub fn wait_for_summary(&self, expected_intervals: u32) -> bool {
        if expected_intervals == 0 {
            return false;
        }
        let budget = (f64::from(expected_intervals) * 0.1).clamp(1.0, 5.0);
        let deadline = Instant::now() + Duration::from_secs_f64(budget);
        loop {
            if parser::sum_report_complete(&self.log.snapshot(), expected_intervals) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(SUMMARY_POLL);
        }
    }

    /// Snapshot, clear and parse the server log.
    pub fn collect(&self, parser: &LogParser) -> IperfMetrics {
        let lines = self.log.take();
        if lines.is_empty() {
            tracing::warn!("iperf server log is empty; no data captured");
        }
        parser.parse(&lines)
    }
}

fn spawn_reader(
    stream: Box<dyn Read + Send>,
    label: String,
    sink: Option<LogBuffer>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("iperf-reader".into())
        .spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut raw = Vec::new();
            loop {
                raw.clear();
                match reader.read_until(b'\n', &mut raw) {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = parser::sanitize_line(&String::from_utf8_lossy(&raw));
                        if line.is_empty() {
                            continue;
                        }
                        tracing::debug!(label = %label, "{line}");
                        if let Some(sink) = &sink {
                            sink.push(line);
                        }
                    }
                    Err(e) => {
                        tracing::debug!(label = %label, error = %e, "output stream closed with error");
                        break;
                    }
                }
            }
        })
}

/// Join readers that finish within `grace`; detach the rest.
fn join_readers(readers: Vec<JoinHandle<()>>, grace: Duration, label: &str) {
    let deadline = Instant::now() + grace;
    for reader in readers {
        while !reader.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        if reader.is_finished() {
            let _ = reader.join();
        } else {
            tracing::debug!(label, "output reader still blocked, detaching");
        }
    }
}
