//! Telnet bridge behaviour against in-memory fake endpoints.

use std::future::Future;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, DuplexStream};
use wifibench_common::config::TelnetConfig;
use wifibench_transport::telnet::{Dialer, TelnetBridge};
use wifibench_transport::{ProcessHandle, TelnetShell, Transport};

#[derive(Clone, Copy)]
enum Peer {
    /// Answers every line with `ran <line>`.
    Shell,
    /// Answers one line, then hangs up.
    OneShot,
    /// Reads but never answers.
    Silent,
    /// Emits numbered lines until interrupted.
    Streaming,
}

struct FakeDialer {
    attempts: Arc<AtomicUsize>,
    resets: usize,
    peer: Peer,
}

impl FakeDialer {
    fn new(resets: usize, peer: Peer) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                attempts: Arc::clone(&attempts),
                resets,
                peer,
            },
            attempts,
        )
    }
}

impl Dialer for FakeDialer {
    type Stream = DuplexStream;

    fn target(&self) -> String {
        "fake-dut:23".into()
    }

    fn dial(&self) -> impl Future<Output = io::Result<DuplexStream>> + Send {
        let n = self.attempts.fetch_add(1, Ordering::SeqCst);
        let reset = n < self.resets;
        let peer = self.peer;
        async move {
            if reset {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer"));
            }
            let (client, server) = tokio::io::duplex(8192);
            tokio::spawn(serve(server, peer));
            Ok(client)
        }
    }
}

/// Next command line from the client, with negotiation replies removed.
async fn next_command<R: AsyncRead + Unpin>(reader: &mut tokio::io::BufReader<R>) -> Option<String> {
    let mut raw = Vec::new();
    if reader.read_until(b'\n', &mut raw).await.ok()? == 0 {
        return None;
    }
    let mut clean = Vec::new();
    let mut bytes = raw.iter().copied();
    while let Some(b) = bytes.next() {
        if b == 255 {
            bytes.next();
            bytes.next();
        } else {
            clean.push(b);
        }
    }
    Some(String::from_utf8_lossy(&clean).trim().to_string())
}

async fn serve(server: DuplexStream, peer: Peer) {
    let (read, mut write) = tokio::io::split(server);
    // DO TERMINAL-TYPE, then a banner the bridge must discard.
    let _ = write.write_all(&[255, 253, 24]).await;
    let _ = write.write_all(b"BusyBox v1.31 built-in shell\r\n# ").await;
    let mut reader = tokio::io::BufReader::new(read);
    match peer {
        Peer::Shell => {
            while let Some(line) = next_command(&mut reader).await {
                let _ = write.write_all(format!("ran {line}\r\n").as_bytes()).await;
            }
        }
        Peer::OneShot => {
            if let Some(line) = next_command(&mut reader).await {
                let _ = write.write_all(format!("ran {line}\r\n").as_bytes()).await;
            }
        }
        Peer::Silent => while next_command(&mut reader).await.is_some() {},
        Peer::Streaming => {
            if next_command(&mut reader).await.is_some() {
                for i in 0.. {
                    let line = format!("[SUM] {i}.0-{}.0 sec 10 MBytes 90 Mbits/sec\r\n", i + 1);
                    if write.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            }
        }
    }
}

fn settings() -> TelnetConfig {
    TelnetConfig {
        connect_timeout: Duration::from_secs(1),
        quiet_window: Duration::from_millis(150),
        command_timeout: Duration::from_secs(5),
        negotiation_wait: Duration::from_millis(30),
    }
}

#[test]
fn reset_then_success_takes_two_attempts() {
    let (dialer, attempts) = FakeDialer::new(1, Peer::Shell);
    let mut bridge = TelnetBridge::new(dialer, settings());

    let out = bridge.execute("iw dev wlan0 link", None);

    let out = out.expect("second attempt should succeed");
    assert!(out.contains("ran iw dev wlan0 link"), "got {out:?}");
    assert!(!out.contains("BusyBox"), "banner leaked: {out:?}");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn two_resets_give_up_without_third_attempt() {
    let (dialer, attempts) = FakeDialer::new(2, Peer::Shell);
    let mut bridge = TelnetBridge::new(dialer, settings());

    assert!(bridge.execute("uptime", None).is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn live_session_is_reused() {
    let (dialer, attempts) = FakeDialer::new(0, Peer::Shell);
    let mut bridge = TelnetBridge::new(dialer, settings());

    assert!(bridge.execute("echo one", None).unwrap().contains("ran echo one"));
    assert!(bridge.execute("echo two", None).unwrap().contains("ran echo two"));
    assert!(bridge.is_connected());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn closed_peer_triggers_reconnect() {
    let (dialer, attempts) = FakeDialer::new(0, Peer::OneShot);
    let mut bridge = TelnetBridge::new(dialer, settings());

    assert!(bridge.execute("echo one", None).unwrap().contains("ran echo one"));
    assert!(bridge.execute("echo two", None).unwrap().contains("ran echo two"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[test]
fn silent_peer_yields_empty_output_after_quiet_window() {
    let (dialer, _) = FakeDialer::new(0, Peer::Silent);
    let mut bridge = TelnetBridge::new(dialer, settings());

    assert_eq!(bridge.execute("true", None).as_deref(), Some(""));
}

#[test]
fn caller_timeout_is_not_retried() {
    let (dialer, attempts) = FakeDialer::new(0, Peer::Silent);
    let mut config = settings();
    config.quiet_window = Duration::from_secs(2);
    let mut bridge = TelnetBridge::new(dialer, config);

    assert!(bridge.execute("sleep 100", Some(Duration::from_millis(200))).is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
    assert!(!bridge.is_connected());
}

#[test]
fn close_is_idempotent_and_final() {
    let (dialer, attempts) = FakeDialer::new(0, Peer::Shell);
    let mut bridge = TelnetBridge::new(dialer, settings());
    assert!(bridge.execute("echo hi", None).is_some());

    bridge.close();
    bridge.close();

    assert!(bridge.execute("echo again", None).is_none());
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[test]
fn wait_reconnect_succeeds_once_endpoint_accepts() {
    let (dialer, attempts) = FakeDialer::new(2, Peer::Shell);
    let mut bridge = TelnetBridge::new(dialer, settings());

    assert!(bridge.wait_reconnect(Duration::from_secs(2), Duration::from_millis(10)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(bridge.execute("echo back", None).unwrap().contains("ran echo back"));
}

#[test]
fn shell_spawn_streams_until_killed() {
    let (dialer, _) = FakeDialer::new(0, Peer::Streaming);
    let mut shell = TelnetShell::new(TelnetBridge::new(dialer, settings()));
    assert!(shell.prefers_execute());

    let mut process = shell.spawn("iperf -s -i 1").expect("stream should open");
    let stdout = process.take_stdout().expect("stdout available once");
    let mut lines = BufReader::new(stdout).lines();

    let first = lines.next().unwrap().unwrap();
    assert!(first.contains("[SUM] 0.0-1.0 sec"), "got {first:?}");
    assert!(process.try_wait().unwrap().is_none());

    process.kill().unwrap();
    assert!(process.try_wait().unwrap().is_some());
    // Remaining buffered lines drain, then EOF.
    for line in lines {
        assert!(line.unwrap().contains("[SUM]"));
    }
}
