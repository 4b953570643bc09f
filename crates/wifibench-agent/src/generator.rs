//! Load generation seam.
//!
//! The aggregator only sees [`LoadGenerator`]; [`IperfLoadGenerator`] is
//! the real implementation, fakes stand in for it in tests.

use std::thread;
use std::time::Duration;

use wifibench_common::config::{DeviceTransportKind, IperfConfig, PacingConfig};
use wifibench_common::{Direction, HarnessConfig, IperfMetrics};
use wifibench_iperf::invocation::{device_kill_command, host_kill_command};
use wifibench_iperf::{IperfInvocation, IperfRunner, LogParser, RunFault};
use wifibench_transport::{AdbShell, LocalShell, TelnetShell, Transport};

use crate::mcs::McsProbe;

const KILL_TIMEOUT: Duration = Duration::from_secs(10);

pub trait LoadGenerator {
    /// Best-effort cleanup of leftover load-generator processes.
    fn kill_stale(&mut self);

    /// One server/client exchange in `direction`.
    fn measure(&mut self, direction: Direction) -> Result<IperfMetrics, RunFault>;

    /// MCS/rate info right after a kept run.
    fn query_mcs(&mut self, _direction: Direction) -> Option<String> {
        None
    }
}

/// iperf between the host and the DUT.
///
/// RX runs the server on the DUT and the client on the host against
/// `dut_ip`; TX swaps the roles and targets `pc_ip`.
pub struct IperfLoadGenerator {
    host: LocalShell,
    device: Box<dyn Transport>,
    runner: IperfRunner,
    iperf: IperfConfig,
    dut_ip: String,
    pc_ip: String,
    pacing: PacingConfig,
    mcs: McsProbe,
}

impl IperfLoadGenerator {
    pub fn new(host: LocalShell, device: Box<dyn Transport>, config: &HarnessConfig) -> Self {
        Self {
            host,
            device,
            runner: IperfRunner::new(),
            iperf: config.iperf.clone(),
            dut_ip: config.device.dut_ip.clone(),
            pc_ip: config.host.pc_ip.clone(),
            pacing: config.pacing.clone(),
            mcs: McsProbe::new(&config.mcs),
        }
    }

    /// Host shell plus the device transport named in the config.
    pub fn from_config(config: &HarnessConfig) -> Self {
        let device: Box<dyn Transport> = match config.device.transport {
            DeviceTransportKind::Adb => Box::new(AdbShell::new(config.device.serial.as_str())),
            DeviceTransportKind::Telnet => Box::new(TelnetShell::connect(
                &config.device.dut_ip,
                config.device.telnet_port,
                config.telnet.clone(),
            )),
        };
        tracing::info!(device = device.name(), "device transport selected");
        Self::new(LocalShell::with_tool_path(&config.host.tool_path), device, config)
    }

    pub fn with_pacing(mut self, pacing: PacingConfig) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_mcs_probe(mut self, mcs: McsProbe) -> Self {
        self.mcs = mcs;
        self
    }

    pub fn runner(&self) -> &IperfRunner {
        &self.runner
    }
}

impl LoadGenerator for IperfLoadGenerator {
    fn kill_stale(&mut self) {
        let tool = self.iperf.test_tool();
        let device_cmd = device_kill_command(tool);
        if self.device.execute(&device_cmd, Some(KILL_TIMEOUT)).is_none() {
            tracing::warn!(device = self.device.name(), command = %device_cmd, "device kill command got no reply");
        }
        let host_cmd = host_kill_command(tool);
        if self.host.execute(&host_cmd, Some(KILL_TIMEOUT)).is_none() {
            tracing::warn!(command = %host_cmd, "host kill command failed");
        }
        thread::sleep(self.pacing.kill_settle);
    }

    fn measure(&mut self, direction: Direction) -> Result<IperfMetrics, RunFault> {
        let host: &mut dyn Transport = &mut self.host;
        let device: &mut dyn Transport = self.device.as_mut();
        let (server_side, client_side, peer_ip) = match direction {
            Direction::Rx => (device, host, self.dut_ip.as_str()),
            Direction::Tx => (host, device, self.pc_ip.as_str()),
        };
        let invocation = IperfInvocation::from_template(&self.iperf.client_cmd, peer_ip);
        tracing::info!(
            %direction,
            server = server_side.name(),
            client = client_side.name(),
            protocol = %invocation.protocol,
            parallel = invocation.parallel,
            duration_s = invocation.duration_secs,
            "iperf run starting"
        );

        let mut server = self.runner.start_server(server_side, &self.iperf.server_cmd)?;
        thread::sleep(self.pacing.server_warmup);

        let exit = self.runner.run_client(client_side, &invocation)?;
        if client_side.prefers_execute() {
            thread::sleep(self.pacing.telnet_client_delay);
        }
        thread::sleep(self.pacing.settle);

        if !self.runner.wait_for_summary(invocation.duration_secs) {
            tracing::debug!(%direction, "no final summary seen before collecting");
        }
        let metrics = self.runner.collect(&LogParser::for_invocation(&invocation));
        server.terminate();

        tracing::info!(
            %direction,
            throughput_mbps = ?metrics.throughput_mbps,
            client_timed_out = exit.timed_out,
            "iperf run finished"
        );
        Ok(metrics)
    }

    fn query_mcs(&mut self, direction: Direction) -> Option<String> {
        self.mcs.query(self.device.as_mut(), direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read};
    use std::sync::{Arc, Mutex};
    use wifibench_common::IperfRole;
    use wifibench_transport::{ProcessExit, ProcessHandle, TransportError};

    struct Canned {
        output: Option<Vec<u8>>,
    }

    impl ProcessHandle for Canned {
        fn id(&self) -> Option<u32> {
            None
        }

        fn take_stdout(&mut self) -> Option<Box<dyn Read + Send>> {
            self.output
                .take()
                .map(|b| Box::new(Cursor::new(b)) as Box<dyn Read + Send>)
        }

        fn take_stderr(&mut self) -> Option<Box<dyn Read + Send>> {
            None
        }

        fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
            Ok(Some(ProcessExit { code: Some(0) }))
        }

        fn kill(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Device side whose spawned processes print `output`.
    #[derive(Clone)]
    struct Device {
        output: &'static str,
        commands: Arc<Mutex<Vec<String>>>,
    }

    impl Transport for Device {
        fn name(&self) -> &str {
            "device"
        }

        fn execute(&mut self, command: &str, _timeout: Option<Duration>) -> Option<String> {
            self.commands.lock().unwrap().push(command.to_string());
            Some(self.output.to_string())
        }

        fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError> {
            self.commands.lock().unwrap().push(command.to_string());
            Ok(Box::new(Canned {
                output: Some(self.output.as_bytes().to_vec()),
            }))
        }

        fn prefers_execute(&self) -> bool {
            true
        }
    }

    fn config() -> HarnessConfig {
        let mut cfg = HarnessConfig::default();
        cfg.device.dut_ip = "192.168.50.20".into();
        cfg.host.pc_ip = "192.168.50.10".into();
        cfg.iperf.server_cmd = "iperf -s -i 1".into();
        cfg.iperf.client_cmd = "iperf -c {ip} -i 1 -t 1".into();
        cfg.mcs.tx_command = Some("cat /proc/net/rate".into());
        cfg
    }

    const MISSING_TOOL: &str = "wifibench-test-no-such-iperf";

    #[test]
    fn tx_server_start_failure_is_a_fault_before_any_client() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let device = Device {
            output: "",
            commands: Arc::clone(&commands),
        };
        let mut cfg = config();
        cfg.iperf.server_cmd = format!("{MISSING_TOOL} -s -i 1");
        let mut generator = IperfLoadGenerator::new(LocalShell::new(), Box::new(device), &cfg)
            .with_pacing(PacingConfig::immediate());

        let fault = generator.measure(Direction::Tx).unwrap_err();
        assert!(
            matches!(fault, RunFault::Start { role: IperfRole::Server, .. }),
            "got {fault}"
        );
        assert!(commands.lock().unwrap().is_empty());
    }

    #[test]
    fn rx_starts_server_on_device_then_client_on_host() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let device = Device {
            output: "[  4]  0.0- 1.0 sec  11 MBytes  94 Mbits/sec\n",
            commands: Arc::clone(&commands),
        };
        let mut cfg = config();
        cfg.iperf.client_cmd = format!("{MISSING_TOOL} -c {{ip}} -t 1");
        let mut generator = IperfLoadGenerator::new(LocalShell::new(), Box::new(device), &cfg)
            .with_pacing(PacingConfig::immediate());

        let fault = generator.measure(Direction::Rx).unwrap_err();
        assert!(
            matches!(fault, RunFault::Start { role: IperfRole::Client, .. }),
            "got {fault}"
        );
        assert_eq!(*commands.lock().unwrap(), vec!["iperf -s -i 1"]);
    }

    #[cfg(unix)]
    #[test]
    fn rx_collects_device_server_output() {
        let device = Device {
            output: "[  4]  0.0- 1.0 sec  11 MBytes  94 Mbits/sec\n",
            commands: Arc::new(Mutex::new(Vec::new())),
        };
        let mut cfg = config();
        // `true` ignores its arguments and exits at once.
        cfg.iperf.client_cmd = "true -c {ip} -t 1".into();
        let mut generator = IperfLoadGenerator::new(LocalShell::new(), Box::new(device), &cfg)
            .with_pacing(PacingConfig::immediate());

        let metrics = generator.measure(Direction::Rx).unwrap();
        assert_eq!(metrics.throughput_mbps, Some(94.0));
        assert!(generator.runner().log().is_empty());
    }

    #[test]
    fn mcs_goes_through_the_device() {
        let commands = Arc::new(Mutex::new(Vec::new()));
        let device = Device {
            output: "MCS11\n",
            commands: Arc::clone(&commands),
        };
        let mut generator = IperfLoadGenerator::new(LocalShell::new(), Box::new(device), &config());
        assert_eq!(generator.query_mcs(Direction::Tx).as_deref(), Some("MCS11"));
        assert_eq!(generator.query_mcs(Direction::Rx), None);
        assert_eq!(*commands.lock().unwrap(), vec!["cat /proc/net/rate"]);
    }
}
