//! Process handles shared by every transport.
//!
//! A [`ProcessHandle`] is whatever a transport started: a local child,
//! an `adb shell` child whose pipes carry device output, or a Telnet
//! session streaming a remote command. Callers only see byte streams,
//! an exit probe and `kill`.

use std::io::{self, Read};
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, unbounded};

/// Poll interval for bounded waits.
const WAIT_POLL: Duration = Duration::from_millis(50);

/// How long [`capture`] keeps reading once the process has exited or been killed.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Exit information of a finished process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when killed by a signal or when the transport has no exit codes.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

pub trait ProcessHandle: Send {
    fn id(&self) -> Option<u32>;
    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>>;
    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>>;
    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>>;
    /// Force-terminate. Killing an already finished process is not an error.
    fn kill(&mut self) -> io::Result<()>;
}

/// Wait for a process with a timeout.
///
/// Returns `Ok(None)` when the deadline passed with the process still
/// running; the caller decides whether to kill it.
pub fn wait_with_timeout(
    handle: &mut dyn ProcessHandle,
    timeout: Duration,
) -> io::Result<Option<ProcessExit>> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(exit) = handle.try_wait()? {
            return Ok(Some(exit));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(WAIT_POLL);
    }
}

/// Everything a finished (or killed) process wrote.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit: Option<ProcessExit>,
    pub timed_out: bool,
}

impl CapturedOutput {
    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr)
        }
    }
}

/// Drain both pipes on helper threads, wait up to `timeout`, kill on
/// expiry. Output produced before the kill is kept.
///
/// Pipes inherited by grandchildren can outlive the process; draining
/// stops [`DRAIN_GRACE`] after the process is gone whether or not the
/// pipes have closed.
pub fn capture(mut handle: Box<dyn ProcessHandle>, timeout: Duration) -> io::Result<CapturedOutput> {
    let stdout = handle.take_stdout().map(spawn_drain);
    let stderr = handle.take_stderr().map(spawn_drain);

    let mut exit = wait_with_timeout(handle.as_mut(), timeout)?;
    let timed_out = exit.is_none();
    if timed_out {
        tracing::warn!(pid = ?handle.id(), timeout_s = timeout.as_secs_f64(), "command timed out, killing");
        handle.kill()?;
        exit = handle.try_wait()?;
    }

    let deadline = Instant::now() + DRAIN_GRACE;
    Ok(CapturedOutput {
        stdout: stdout.map(|rx| collect_drain(&rx, deadline)).unwrap_or_default(),
        stderr: stderr.map(|rx| collect_drain(&rx, deadline)).unwrap_or_default(),
        exit,
        timed_out,
    })
}

fn spawn_drain(mut stream: Box<dyn Read + Send>) -> Receiver<Vec<u8>> {
    let (tx, rx) = unbounded();
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::debug!(error = %e, "output pipe closed with error");
                    break;
                }
            }
        }
    });
    rx
}

/// Everything the drain thread forwarded before it finished or `deadline` passed.
fn collect_drain(rx: &Receiver<Vec<u8>>, deadline: Instant) -> String {
    let mut bytes = Vec::new();
    loop {
        match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(chunk) => bytes.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let queued = rx.len();
                for chunk in rx.try_iter().take(queued) {
                    bytes.extend_from_slice(&chunk);
                }
                tracing::debug!("output pipe still held open, leaving its drain behind");
                break;
            }
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

// ── Local child ─────────────────────────────────────────────────────

/// [`ProcessHandle`] over a `std::process::Child`.
pub struct ChildProcess {
    child: Child,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self { child }
    }
}

impl ProcessHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        match self.child.kill() {
            Ok(()) => {}
            // Raced with a natural exit.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        self.child.wait()?;
        Ok(())
    }
}

// ── Channel-backed reader ───────────────────────────────────────────

/// `Read` adapter over a channel of byte chunks.
///
/// Reports end-of-stream once every sender is dropped.
pub struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ChannelReader {
    pub fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = (self.pending.len() - self.pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}
