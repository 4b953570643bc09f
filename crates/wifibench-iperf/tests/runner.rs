//! Session runner against scripted transports.

use std::io::{self, Cursor, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use wifibench_iperf::parser::LogParser;
use wifibench_iperf::{IperfInvocation, IperfRunner, RunFault};
use wifibench_transport::{ProcessExit, ProcessHandle, Transport, TransportError};

/// A process whose output is fixed up front.
struct ScriptedProcess {
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
    /// Exits by itself once its output is read; otherwise runs until killed.
    exits: bool,
    killed: Arc<AtomicBool>,
}

impl ProcessHandle for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        None
    }

    fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stdout
            .take()
            .map(|b| Box::new(Cursor::new(b)) as Box<dyn Read + Send>)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
        self.stderr
            .take()
            .map(|b| Box::new(Cursor::new(b)) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(Some(ProcessExit { code: None }));
        }
        Ok(self.exits.then_some(ProcessExit { code: Some(0) }))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.killed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct ScriptedTransport {
    stdout: &'static str,
    stderr: &'static str,
    exits: bool,
    fail_spawn: bool,
    prefers_execute: bool,
    reply: Option<&'static str>,
    spawned: Vec<String>,
    killed: Arc<AtomicBool>,
}

impl Transport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    fn execute(&mut self, command: &str, _timeout: Option<Duration>) -> Option<String> {
        self.spawned.push(command.to_string());
        self.reply.map(str::to_string)
    }

    fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError> {
        self.spawned.push(command.to_string());
        if self.fail_spawn {
            return Err(TransportError::Spawn {
                command: command.to_string(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
            });
        }
        Ok(Box::new(ScriptedProcess {
            stdout: Some(self.stdout.as_bytes().to_vec()),
            stderr: Some(self.stderr.as_bytes().to_vec()),
            exits: self.exits,
            killed: Arc::clone(&self.killed),
        }))
    }

    fn prefers_execute(&self) -> bool {
        self.prefers_execute
    }
}

fn wait_for_lines(runner: &IperfRunner, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while runner.log().len() < n && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn server_output_lands_in_log_cleaned() {
    let mut transport = ScriptedTransport {
        stdout: "Server listening on TCP port 5001\r\n\x1b[32m[  4]\x1b[0m  0.0-10.0 sec  117 MBytes  98 Mbits/sec\r\n\r\n",
        stderr: "warning: TCP window size differs\n",
        ..Default::default()
    };
    let runner = IperfRunner::new();
    runner.log().push("stale line from the previous run".into());

    let mut server = runner.start_server(&mut transport, "iperf -s -w 2m -i 1").unwrap();
    wait_for_lines(&runner, 3);
    server.terminate();

    let lines = runner.log().snapshot();
    assert_eq!(lines.len(), 3);
    assert!(lines.contains(&"[  4]  0.0-10.0 sec  117 MBytes  98 Mbits/sec".to_string()));
    assert!(!lines.iter().any(|l| l.contains("stale")));

    let metrics = runner.collect(&LogParser::new(1, 10));
    assert_eq!(metrics.throughput_mbps, Some(98.0));
    assert!(runner.log().is_empty());
}

#[test]
fn terminate_is_idempotent_and_kills_once() {
    let mut transport = ScriptedTransport::default();
    let killed = Arc::clone(&transport.killed);
    let runner = IperfRunner::new();
    let mut server = runner.start_server(&mut transport, "iperf -s").unwrap();
    assert!(server.is_running());

    server.terminate();
    server.terminate();
    assert!(killed.load(Ordering::SeqCst));
    assert!(!server.is_running());
}

#[test]
fn spawn_failure_is_a_start_fault() {
    let mut transport = ScriptedTransport {
        fail_spawn: true,
        ..Default::default()
    };
    let runner = IperfRunner::new();
    let invocation = IperfInvocation::from_template("iperf -c {ip} -t 5", "10.0.0.2");
    let err = runner.run_client(&mut transport, &invocation).unwrap_err();
    assert!(matches!(err, RunFault::Start { .. }), "got {err}");
}

#[test]
fn client_that_exits_reports_status() {
    let mut transport = ScriptedTransport {
        stdout: "[  3]  0.0- 1.0 sec  11 MBytes  94 Mbits/sec\n",
        exits: true,
        ..Default::default()
    };
    let runner = IperfRunner::new();
    let invocation = IperfInvocation::from_template("iperf -c {ip} -t 1", "10.0.0.2");

    let exit = runner.run_client(&mut transport, &invocation).unwrap();
    assert!(!exit.timed_out);
    assert_eq!(exit.exit, Some(ProcessExit { code: Some(0) }));
    assert_eq!(transport.spawned, vec!["iperf -c 10.0.0.2 -t 1"]);
    // Client output is logged, not captured.
    assert!(runner.log().is_empty());
}

#[test]
fn overrunning_client_is_killed() {
    let mut transport = ScriptedTransport::default();
    let killed = Arc::clone(&transport.killed);
    let runner = IperfRunner::new();
    let invocation = IperfInvocation::from_template("iperf -c {ip} -t 30", "10.0.0.2");

    let started = Instant::now();
    let exit = runner
        .run_client_within(&mut transport, &invocation, Duration::from_millis(150))
        .unwrap();
    assert!(exit.timed_out);
    assert!(killed.load(Ordering::SeqCst));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn execute_transports_run_client_inline() {
    let mut transport = ScriptedTransport {
        prefers_execute: true,
        reply: Some("[  3]  0.0-10.0 sec  117 MBytes  98 Mbits/sec\r\n"),
        ..Default::default()
    };
    let runner = IperfRunner::new();
    let invocation = IperfInvocation::from_template("iperf -c {ip} -t 10", "192.168.1.1");

    let exit = runner.run_client(&mut transport, &invocation).unwrap();
    assert_eq!(exit.exit, None);
    assert_eq!(transport.spawned, vec!["iperf -c 192.168.1.1 -t 10"]);

    transport.reply = None;
    let err = runner.run_client(&mut transport, &invocation).unwrap_err();
    assert!(matches!(err, RunFault::NoReply { .. }));
}

#[test]
fn wait_for_summary_returns_early_on_final_report() {
    let runner = IperfRunner::new();
    runner
        .log()
        .push("[SUM]  0.0-10.0 sec  490 MBytes  411 Mbits/sec".into());
    let started = Instant::now();
    assert!(runner.wait_for_summary(10));
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[test]
fn wait_for_summary_gives_up_after_budget() {
    let runner = IperfRunner::new();
    let started = Instant::now();
    assert!(!runner.wait_for_summary(5));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(900), "waited {waited:?}");
    assert!(waited < Duration::from_secs(3));
    assert!(!runner.wait_for_summary(0));
}

#[cfg(unix)]
#[test]
fn local_client_is_killed_on_timeout() {
    let mut shell = wifibench_transport::LocalShell::new();
    let runner = IperfRunner::new();
    let invocation = IperfInvocation::from_template("sleep 5", "");
    let exit = runner
        .run_client_within(&mut shell, &invocation, Duration::from_millis(200))
        .unwrap();
    assert!(exit.timed_out);
}
