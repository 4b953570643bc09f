//! Synchronous façade over an asynchronous Telnet session.
//!
//! Each bridge owns one worker thread running a current-thread tokio
//! runtime for as long as the bridge lives. Public methods spawn a task
//! onto that runtime and block on a crossbeam reply channel with a
//! timeout, so callers see plain blocking calls with bounded latency.
//!
//! The connection object travels with the task and comes back in the
//! reply. A task that times out is aborted and its connection is dropped
//! with it, which is how a hung session gets invalidated.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, bounded, unbounded};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use wifibench_common::config::TelnetConfig;

use super::option::OptionFilter;
use crate::error::TransportError;
use crate::process::{ChannelReader, ProcessExit, ProcessHandle};

/// Total tries per `execute`: the first send plus one reconnect-and-resend.
pub const MAX_ATTEMPTS: u32 = 2;

/// How long the liveness probe listens for EOF before declaring the
/// session alive.
const PROBE_WINDOW: Duration = Duration::from_millis(20);

/// Upper bound on stale chunks discarded by one probe.
const PROBE_MAX_CHUNKS: usize = 64;

/// Grace period for close and kill handshakes.
const TEARDOWN_GRACE: Duration = Duration::from_secs(1);

const CTRL_C: u8 = 0x03;

const READ_CHUNK: usize = 4096;

// ── Dialer ──────────────────────────────────────────────────────────

/// Opens the byte stream a session runs over.
pub trait Dialer: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Endpoint label for logs.
    fn target(&self) -> String;

    fn dial(&self) -> impl Future<Output = io::Result<Self::Stream>> + Send;
}

/// Plain TCP with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    addr: String,
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(host: &str, port: u16, connect_timeout: Duration) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout,
        }
    }
}

impl Dialer for TcpDialer {
    type Stream = TcpStream;

    fn target(&self) -> String {
        self.addr.clone()
    }

    fn dial(&self) -> impl Future<Output = io::Result<TcpStream>> + Send {
        let addr = self.addr.clone();
        let limit = self.connect_timeout;
        async move {
            match tokio::time::timeout(limit, TcpStream::connect(&addr)).await {
                Ok(result) => {
                    let stream = result?;
                    stream.set_nodelay(true)?;
                    Ok(stream)
                }
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )),
            }
        }
    }
}

// ── Faults ──────────────────────────────────────────────────────────

#[derive(Debug, Error)]
enum BridgeFault {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("no reply within {0:?}")]
    TimedOut(Duration),
    #[error("event loop unusable")]
    LoopUnusable,
    #[error("bridge closed")]
    Closed,
}

impl BridgeFault {
    fn is_retryable(&self) -> bool {
        match self {
            BridgeFault::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::TimedOut
            ),
            BridgeFault::LoopUnusable => true,
            BridgeFault::TimedOut(_) | BridgeFault::Closed => false,
        }
    }
}

// ── Connection ──────────────────────────────────────────────────────

struct Connection<S> {
    stream: S,
    filter: OptionFilter,
    eof: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            filter: OptionFilter::new(),
            eof: false,
        }
    }

    /// One read: payload goes to `out`, negotiation replies go straight
    /// back to the peer. Returns the raw byte count, 0 on EOF.
    async fn read_chunk(&mut self, buf: &mut [u8], out: &mut Vec<u8>) -> io::Result<usize> {
        let n = self.stream.read(buf).await?;
        if n == 0 {
            self.eof = true;
            return Ok(0);
        }
        let mut replies = Vec::new();
        self.filter.feed(&buf[..n], out, &mut replies);
        if !replies.is_empty() {
            self.stream.write_all(&replies).await?;
        }
        Ok(n)
    }

    async fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(line.as_bytes()).await?;
        self.stream.flush().await
    }

    /// False once the peer has closed or the socket errors. Output left
    /// over from an earlier command is discarded.
    async fn probe(&mut self) -> bool {
        if self.eof {
            return false;
        }
        let mut buf = [0u8; 1024];
        let mut stale = Vec::new();
        for _ in 0..PROBE_MAX_CHUNKS {
            match tokio::time::timeout(PROBE_WINDOW, self.read_chunk(&mut buf, &mut stale)).await {
                Err(_) => return true,
                Ok(Ok(0)) | Ok(Err(_)) => return false,
                Ok(Ok(_)) => {}
            }
        }
        true
    }

    /// Write `line`, then collect output until `quiet` passes without a byte.
    async fn exchange(&mut self, line: &str, quiet: Duration) -> io::Result<Vec<u8>> {
        self.send_line(line).await?;
        let mut out = Vec::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match tokio::time::timeout(quiet, self.read_chunk(&mut buf, &mut out)).await {
                Err(_) => break,
                Ok(Ok(0)) if out.is_empty() => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed before replying",
                    ));
                }
                Ok(Ok(0)) => break,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
            }
        }
        Ok(out)
    }
}

/// Dial and sit through option negotiation; the login banner is dropped.
async fn open<D: Dialer>(dialer: &D, negotiation_wait: Duration) -> io::Result<Connection<D::Stream>> {
    let stream = dialer.dial().await?;
    let mut conn = Connection::new(stream);
    let deadline = tokio::time::Instant::now() + negotiation_wait;
    let mut banner = Vec::new();
    let mut buf = [0u8; 1024];
    while let Ok(read) = tokio::time::timeout_at(deadline, conn.read_chunk(&mut buf, &mut banner)).await {
        if read? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed during negotiation",
            ));
        }
    }
    tracing::debug!(target_addr = %dialer.target(), banner_bytes = banner.len(), "telnet session open");
    Ok(conn)
}

type Exchange<S> = (Option<Connection<S>>, io::Result<Vec<u8>>);

/// Revalidate `conn`, reconnecting if stale, then run one command on it.
async fn run_exchange<D: Dialer>(
    dialer: Arc<D>,
    conn: Option<Connection<D::Stream>>,
    settings: TelnetConfig,
    line: String,
) -> Exchange<D::Stream> {
    let live = match conn {
        Some(mut c) => {
            if c.probe().await {
                Some(c)
            } else {
                tracing::debug!(target_addr = %dialer.target(), "telnet session stale, reconnecting");
                None
            }
        }
        None => None,
    };
    let mut conn = match live {
        Some(c) => c,
        None => match open(&*dialer, settings.negotiation_wait).await {
            Ok(c) => c,
            Err(e) => return (None, Err(e)),
        },
    };
    match conn.exchange(&line, settings.quiet_window).await {
        Ok(bytes) => (Some(conn), Ok(bytes)),
        Err(e) => (None, Err(e)),
    }
}

// ── Loop worker ─────────────────────────────────────────────────────

/// Thread owning a current-thread runtime until shut down.
struct LoopWorker {
    handle: Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl LoopWorker {
    fn start(name: &str) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let thread = thread::Builder::new()
            .name(format!("telnet-{name}"))
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;
        Ok(Self {
            handle,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and join the thread. Pending tasks are cancelled.
    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for LoopWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Bridge ──────────────────────────────────────────────────────────

/// A Telnet endpoint presented as a blocking, retrying command channel.
///
/// Holds at most one session. Methods take `&mut self`, so commands on
/// one bridge are never pipelined.
pub struct TelnetBridge<D: Dialer> {
    dialer: Arc<D>,
    settings: TelnetConfig,
    conn: Option<Connection<D::Stream>>,
    worker: Option<LoopWorker>,
    closed: bool,
}

impl TelnetBridge<TcpDialer> {
    pub fn tcp(host: &str, port: u16, settings: TelnetConfig) -> Self {
        let dialer = TcpDialer::new(host, port, settings.connect_timeout);
        Self::new(dialer, settings)
    }
}

impl<D: Dialer> TelnetBridge<D> {
    /// The worker starts lazily on first use.
    pub fn new(dialer: D, settings: TelnetConfig) -> Self {
        Self::with_shared(Arc::new(dialer), settings)
    }

    fn with_shared(dialer: Arc<D>, settings: TelnetConfig) -> Self {
        Self {
            dialer,
            settings,
            conn: None,
            worker: None,
            closed: false,
        }
    }

    /// A fresh, unconnected bridge to the same endpoint.
    pub fn sibling(&self) -> Self {
        Self::with_shared(Arc::clone(&self.dialer), self.settings.clone())
    }

    pub fn target(&self) -> String {
        self.dialer.target()
    }

    pub fn settings(&self) -> &TelnetConfig {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.eof)
    }

    fn worker(&mut self) -> Result<Handle, BridgeFault> {
        if self.closed {
            return Err(BridgeFault::Closed);
        }
        if let Some(worker) = &self.worker {
            if worker.is_running() {
                return Ok(worker.handle.clone());
            }
            tracing::warn!(target_addr = %self.dialer.target(), "telnet loop worker died, restarting");
        }
        let worker = LoopWorker::start(&self.dialer.target())?;
        let handle = worker.handle.clone();
        self.worker = Some(worker);
        Ok(handle)
    }

    fn restart_worker(&mut self) {
        self.conn = None;
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    /// Run `command` and return everything it printed.
    ///
    /// `None` when no session could be established or both attempts hit
    /// a transient fault. A caller-side timeout is not retried.
    pub fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Option<String> {
        let timeout = timeout.unwrap_or(self.settings.command_timeout);
        let target = self.dialer.target();
        for attempt in 1..=MAX_ATTEMPTS {
            match self.execute_once(command, timeout) {
                Ok(text) => return Some(text),
                Err(fault) if fault.is_retryable() && attempt < MAX_ATTEMPTS => {
                    tracing::warn!(target_addr = %target, attempt, command, error = %fault, "telnet command failed, reconnecting");
                    if matches!(fault, BridgeFault::LoopUnusable) {
                        self.restart_worker();
                    }
                    self.conn = None;
                }
                Err(fault) => {
                    tracing::warn!(target_addr = %target, attempt, command, error = %fault, "telnet command abandoned");
                    return None;
                }
            }
        }
        None
    }

    fn execute_once(&mut self, command: &str, timeout: Duration) -> Result<String, BridgeFault> {
        let handle = self.worker()?;
        let conn = self.conn.take();
        let dialer = Arc::clone(&self.dialer);
        let settings = self.settings.clone();
        let line = format!("{command}\n");
        let (reply_tx, reply_rx) = bounded(1);

        let task = handle.spawn(async move {
            let reply = run_exchange(dialer, conn, settings, line).await;
            let _ = reply_tx.send(reply);
        });

        match reply_rx.recv_timeout(timeout) {
            Ok((conn, Ok(bytes))) => {
                self.conn = conn;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            Ok((_, Err(e))) => Err(BridgeFault::Io(e)),
            Err(RecvTimeoutError::Timeout) => {
                task.abort();
                Err(BridgeFault::TimedOut(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeFault::LoopUnusable),
        }
    }

    /// Poll-dial until the endpoint accepts a session or `timeout` passes.
    pub fn wait_reconnect(&mut self, timeout: Duration, interval: Duration) -> bool {
        self.conn = None;
        let deadline = Instant::now() + timeout;
        let target = self.dialer.target();
        loop {
            match self.open_once() {
                Ok(()) => {
                    tracing::info!(target_addr = %target, "telnet endpoint reachable again");
                    return true;
                }
                Err(BridgeFault::Closed) => return false,
                Err(e) => tracing::debug!(target_addr = %target, error = %e, "telnet endpoint not reachable yet"),
            }
            if Instant::now() + interval >= deadline {
                tracing::warn!(target_addr = %target, timeout_s = timeout.as_secs_f64(), "telnet endpoint did not come back");
                return false;
            }
            thread::sleep(interval);
        }
    }

    fn open_once(&mut self) -> Result<(), BridgeFault> {
        let handle = self.worker()?;
        let dialer = Arc::clone(&self.dialer);
        let negotiation_wait = self.settings.negotiation_wait;
        let budget = self.settings.connect_timeout + negotiation_wait + TEARDOWN_GRACE;
        let (reply_tx, reply_rx) = bounded(1);
        let task = handle.spawn(async move {
            let _ = reply_tx.send(open(&*dialer, negotiation_wait).await);
        });
        match reply_rx.recv_timeout(budget) {
            Ok(Ok(conn)) => {
                self.conn = Some(conn);
                Ok(())
            }
            Ok(Err(e)) => Err(BridgeFault::Io(e)),
            Err(RecvTimeoutError::Timeout) => {
                task.abort();
                Err(BridgeFault::TimedOut(budget))
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeFault::LoopUnusable),
        }
    }

    /// Start a long-running command on this bridge's own session.
    ///
    /// Output arrives through the returned stream's reader until the
    /// peer closes or the stream is killed.
    pub fn stream(mut self, command: &str) -> Result<TelnetStream<D>, TransportError> {
        let target = self.dialer.target();
        let unavailable = |reason: String| TransportError::Unavailable {
            target: target.clone(),
            reason,
        };
        let handle = self.worker().map_err(|e| unavailable(e.to_string()))?;
        self.conn = None;

        let dialer = Arc::clone(&self.dialer);
        let negotiation_wait = self.settings.negotiation_wait;
        let line = format!("{command}\n");
        let (chunk_tx, chunk_rx) = unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let (stop_tx, stop_rx) = oneshot::channel();
        let done = Arc::new(AtomicBool::new(false));
        let done_flag = Arc::clone(&done);

        handle.spawn(async move {
            pump_output(dialer, negotiation_wait, line, chunk_tx, ready_tx, stop_rx).await;
            done_flag.store(true, Ordering::Release);
        });

        let budget = self.settings.connect_timeout + negotiation_wait + TEARDOWN_GRACE;
        match ready_rx.recv_timeout(budget) {
            Ok(Ok(())) => {
                tracing::debug!(target_addr = %target, command, "telnet stream started");
                Ok(TelnetStream {
                    bridge: self,
                    stdout: Some(ChannelReader::new(chunk_rx)),
                    stop_tx: Some(stop_tx),
                    done,
                })
            }
            Ok(Err(e)) => Err(unavailable(e.to_string())),
            Err(RecvTimeoutError::Timeout) => Err(unavailable(format!("no session within {budget:?}"))),
            Err(RecvTimeoutError::Disconnected) => Err(unavailable("event loop unusable".into())),
        }
    }

    /// Close the session, stop the loop and join the worker. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let (Some(mut conn), Some(worker)) = (self.conn.take(), self.worker.as_ref()) {
            let (done_tx, done_rx) = bounded::<()>(1);
            worker.handle.spawn(async move {
                let _ = conn.stream.shutdown().await;
                let _ = done_tx.send(());
            });
            let _ = done_rx.recv_timeout(TEARDOWN_GRACE);
        }
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            tracing::debug!(target_addr = %self.dialer.target(), "telnet bridge closed");
        }
    }
}

impl<D: Dialer> Drop for TelnetBridge<D> {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump_output<D: Dialer>(
    dialer: Arc<D>,
    negotiation_wait: Duration,
    line: String,
    chunks: Sender<Vec<u8>>,
    ready: Sender<io::Result<()>>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut conn = match open(&*dialer, negotiation_wait).await {
        Ok(c) => c,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if let Err(e) = conn.send_line(&line).await {
        let _ = ready.send(Err(e));
        return;
    }
    let _ = ready.send(Ok(()));

    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let mut out = Vec::new();
        tokio::select! {
            read = conn.read_chunk(&mut buf, &mut out) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if !out.is_empty() && chunks.send(out).is_err() {
                        break;
                    }
                }
            },
            _ = &mut stop => {
                let _ = conn.stream.write_all(&[CTRL_C]).await;
                let _ = conn.stream.shutdown().await;
                break;
            }
        }
    }
}

// ── Stream handle ───────────────────────────────────────────────────

/// A command running in a dedicated Telnet session.
pub struct TelnetStream<D: Dialer> {
    bridge: TelnetBridge<D>,
    stdout: Option<ChannelReader>,
    stop_tx: Option<oneshot::Sender<()>>,
    done: Arc<AtomicBool>,
}

impl<D: Dialer> TelnetStream<D> {
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

impl<D: Dialer> ProcessHandle for TelnetStream<D> {
    fn id(&self) -> Option<u32> {
        None
    }

    fn take_stdout(&mut self) -> Option<Box<dyn io::Read + Send>> {
        self.stdout
            .take()
            .map(|r| Box::new(r) as Box<dyn io::Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn io::Read + Send>> {
        None
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        Ok(self.is_finished().then_some(ProcessExit { code: None }))
    }

    /// Ctrl-C, close, stop the loop.
    fn kill(&mut self) -> io::Result<()> {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
            let deadline = Instant::now() + TEARDOWN_GRACE;
            while !self.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
        }
        self.bridge.close();
        Ok(())
    }
}

impl<D: Dialer> Drop for TelnetStream<D> {
    fn drop(&mut self) {
        let _ = self.kill();
    }
}
