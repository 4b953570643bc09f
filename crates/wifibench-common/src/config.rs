//! Harness configuration.
//!
//! Parsed from TOML in two steps: the `*Input` structs accept any subset
//! of keys, then [`HarnessConfigInput::resolve`] fills defaults and
//! rejects values that cannot work.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_SERVER_CMD: &str = "iperf -s -w 2m -i 1";
pub const DEFAULT_CLIENT_CMD: &str = "iperf -c {ip} -w 2m -i 1 -t 30 -P 5";

/// Upper bound for `rvr.repeat`; a row carries `repeat + 1` throughput cells.
pub const MAX_REPEAT: u32 = 100;

// ── Raw input ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub device: DeviceInput,
    pub host: HostInput,
    pub iperf: IperfInput,
    pub rvr: RvrInput,
    pub telnet: TelnetInput,
    pub pacing: PacingInput,
    pub mcs: McsInput,
    pub expected_rate: Vec<ExpectedRateInput>,
    pub report: ReportInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceInput {
    pub serial: Option<String>,
    pub transport: Option<String>,
    pub dut_ip: Option<String>,
    pub telnet_port: Option<u16>,
    pub rssi: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostInput {
    pub pc_ip: Option<String>,
    pub tool_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IperfInput {
    pub server_cmd: Option<String>,
    pub client_cmd: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RvrInput {
    pub repeat: Option<u32>,
    pub throughput_threshold: Option<f64>,
    pub debug: Option<bool>,
    pub debug_seed: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelnetInput {
    pub connect_timeout_ms: Option<u64>,
    pub quiet_window_ms: Option<u64>,
    pub command_timeout_ms: Option<u64>,
    pub negotiation_wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacingInput {
    pub server_warmup_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub telnet_client_delay_ms: Option<u64>,
    pub kill_settle_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct McsInput {
    pub rx_command: Option<String>,
    pub tx_command: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ExpectedRateInput {
    pub band: String,
    pub mode: Option<String>,
    pub bandwidth: Option<String>,
    pub security: Option<String>,
    pub dl: Option<f64>,
    pub ul: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReportInput {
    pub dir: Option<String>,
}

// ── Resolved config ─────────────────────────────────────────────────

/// How the harness reaches the device shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceTransportKind {
    Adb,
    Telnet,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    pub serial: String,
    pub transport: DeviceTransportKind,
    pub dut_ip: String,
    pub telnet_port: u16,
    pub rssi: i32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: "executer".into(),
            transport: DeviceTransportKind::Adb,
            dut_ip: String::new(),
            telnet_port: 23,
            rssi: -1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostConfig {
    pub pc_ip: String,
    /// Directory searched for the iperf binary when it is not on `PATH`.
    pub tool_path: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IperfConfig {
    pub server_cmd: String,
    pub client_cmd: String,
}

impl Default for IperfConfig {
    fn default() -> Self {
        Self {
            server_cmd: DEFAULT_SERVER_CMD.into(),
            client_cmd: DEFAULT_CLIENT_CMD.into(),
        }
    }
}

impl IperfConfig {
    /// Process name used by kill commands.
    pub fn test_tool(&self) -> &'static str {
        if self.server_cmd.contains("iperf3") || self.client_cmd.contains("iperf3") {
            "iperf3"
        } else {
            "iperf"
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RvrConfig {
    pub repeat: u32,
    /// First-run throughput below this (Mbps) sets the skip flag.
    pub throughput_threshold: f64,
    /// Simulation mode: synthesize values without touching iperf.
    pub debug: bool,
    pub debug_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelnetConfig {
    pub connect_timeout: Duration,
    /// Output is considered complete after this long without new bytes.
    pub quiet_window: Duration,
    /// Default per-command budget when the caller passes no timeout.
    pub command_timeout: Duration,
    /// Time allowed for option negotiation after connect.
    pub negotiation_wait: Duration,
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            quiet_window: Duration::from_secs(2),
            command_timeout: Duration::from_secs(30),
            negotiation_wait: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PacingConfig {
    /// Delay between starting the server and starting the client.
    pub server_warmup: Duration,
    /// Delay after a run before results are collected.
    pub settle: Duration,
    /// Extra delay after a Telnet-driven client returns.
    pub telnet_client_delay: Duration,
    /// Delay after killing stale processes.
    pub kill_settle: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            server_warmup: Duration::from_secs(1),
            settle: Duration::from_secs(3),
            telnet_client_delay: Duration::from_secs(5),
            kill_settle: Duration::from_secs(1),
        }
    }
}

impl PacingConfig {
    /// No waits at all; for dry runs and tests.
    pub fn immediate() -> Self {
        Self {
            server_warmup: Duration::ZERO,
            settle: Duration::ZERO,
            telnet_client_delay: Duration::ZERO,
            kill_settle: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct McsConfig {
    pub rx_command: Option<String>,
    pub tx_command: Option<String>,
}

/// One row of the static expected-throughput table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedRate {
    pub band: String,
    pub mode: String,
    pub bandwidth: String,
    pub security: String,
    pub dl: f64,
    pub ul: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub device: DeviceConfig,
    pub host: HostConfig,
    pub iperf: IperfConfig,
    pub rvr: RvrConfig,
    pub telnet: TelnetConfig,
    pub pacing: PacingConfig,
    pub mcs: McsConfig,
    pub expected_rates: Vec<ExpectedRate>,
    pub report_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            host: HostConfig::default(),
            iperf: IperfConfig::default(),
            rvr: RvrConfig::default(),
            telnet: TelnetConfig::default(),
            pacing: PacingConfig::default(),
            mcs: McsConfig::default(),
            expected_rates: Vec::new(),
            report_dir: PathBuf::from("."),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn ms_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

impl HarnessConfigInput {
    pub fn resolve(self) -> Result<HarnessConfig, ConfigError> {
        let transport = match non_empty(self.device.transport).as_deref() {
            None => DeviceTransportKind::Adb,
            Some(kind) => match kind.to_ascii_lowercase().as_str() {
                "adb" => DeviceTransportKind::Adb,
                "telnet" => DeviceTransportKind::Telnet,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown device transport '{other}' (expected adb or telnet)"
                    )));
                }
            },
        };
        let dut_ip = non_empty(self.device.dut_ip).unwrap_or_default();
        if transport == DeviceTransportKind::Telnet && dut_ip.is_empty() {
            return Err(ConfigError::Invalid(
                "device.dut_ip is required for the telnet transport".into(),
            ));
        }
        let device_defaults = DeviceConfig::default();
        let device = DeviceConfig {
            serial: non_empty(self.device.serial).unwrap_or(device_defaults.serial),
            transport,
            dut_ip,
            telnet_port: self.device.telnet_port.unwrap_or(device_defaults.telnet_port),
            rssi: self.device.rssi.unwrap_or(device_defaults.rssi),
        };

        let host = HostConfig {
            pc_ip: non_empty(self.host.pc_ip).unwrap_or_default(),
            tool_path: non_empty(self.host.tool_path).unwrap_or_default(),
        };

        let iperf = IperfConfig {
            server_cmd: non_empty(self.iperf.server_cmd).unwrap_or_else(|| DEFAULT_SERVER_CMD.into()),
            client_cmd: non_empty(self.iperf.client_cmd).unwrap_or_else(|| DEFAULT_CLIENT_CMD.into()),
        };
        if !iperf.client_cmd.contains("{ip}") {
            tracing::warn!(client_cmd = %iperf.client_cmd, "client command has no {{ip}} placeholder");
        }

        let threshold = self.rvr.throughput_threshold.unwrap_or(0.0);
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "rvr.throughput_threshold must be a non-negative number, got {threshold}"
            )));
        }
        let repeat = self.rvr.repeat.unwrap_or(0);
        if repeat > MAX_REPEAT {
            return Err(ConfigError::Invalid(format!(
                "rvr.repeat must be at most {MAX_REPEAT}, got {repeat}"
            )));
        }
        let rvr = RvrConfig {
            repeat,
            throughput_threshold: threshold,
            debug: self.rvr.debug.unwrap_or(false),
            debug_seed: self.rvr.debug_seed,
        };

        let telnet_defaults = TelnetConfig::default();
        let telnet = TelnetConfig {
            connect_timeout: ms_or(self.telnet.connect_timeout_ms, telnet_defaults.connect_timeout),
            quiet_window: ms_or(self.telnet.quiet_window_ms, telnet_defaults.quiet_window),
            command_timeout: ms_or(self.telnet.command_timeout_ms, telnet_defaults.command_timeout),
            negotiation_wait: ms_or(
                self.telnet.negotiation_wait_ms,
                telnet_defaults.negotiation_wait,
            ),
        };
        if telnet.quiet_window.is_zero() {
            return Err(ConfigError::Invalid("telnet.quiet_window_ms must be > 0".into()));
        }

        let pacing_defaults = PacingConfig::default();
        let pacing = PacingConfig {
            server_warmup: ms_or(self.pacing.server_warmup_ms, pacing_defaults.server_warmup),
            settle: ms_or(self.pacing.settle_ms, pacing_defaults.settle),
            telnet_client_delay: ms_or(
                self.pacing.telnet_client_delay_ms,
                pacing_defaults.telnet_client_delay,
            ),
            kill_settle: ms_or(self.pacing.kill_settle_ms, pacing_defaults.kill_settle),
        };

        let mcs = McsConfig {
            rx_command: non_empty(self.mcs.rx_command),
            tx_command: non_empty(self.mcs.tx_command),
        };

        let mut expected_rates = Vec::with_capacity(self.expected_rate.len());
        for (idx, row) in self.expected_rate.into_iter().enumerate() {
            let band = row.band.trim().to_string();
            if band.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "expected_rate[{idx}] has no band"
                )));
            }
            let (Some(dl), Some(ul)) = (row.dl, row.ul) else {
                return Err(ConfigError::Invalid(format!(
                    "expected_rate[{idx}] ({band}) needs both dl and ul"
                )));
            };
            expected_rates.push(ExpectedRate {
                band,
                mode: non_empty(row.mode).unwrap_or_default(),
                bandwidth: non_empty(row.bandwidth).unwrap_or_default(),
                security: non_empty(row.security).unwrap_or_default(),
                dl,
                ul,
            });
        }

        let report_dir = non_empty(self.report.dir)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(HarnessConfig {
            device,
            host,
            iperf,
            rvr,
            telnet,
            pacing,
            mcs,
            expected_rates,
            report_dir,
        })
    }
}

impl HarnessConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(HarnessConfig::default());
        }
        let parsed: HarnessConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_empty_input() {
        assert_eq!(HarnessConfig::default(), HarnessConfigInput::default().resolve().unwrap());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = HarnessConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.iperf.server_cmd, DEFAULT_SERVER_CMD);
        assert_eq!(cfg.iperf.client_cmd, DEFAULT_CLIENT_CMD);
        assert_eq!(cfg.rvr.repeat, 0);
        assert_eq!(cfg.device.transport, DeviceTransportKind::Adb);
        assert_eq!(cfg.telnet.quiet_window, Duration::from_secs(2));
        assert_eq!(cfg.iperf.test_tool(), "iperf");
    }

    #[test]
    fn parse_toml_config_full() {
        let toml = r#"
            [device]
            serial = "ABC123"
            transport = "telnet"
            dut_ip = "192.168.50.20"

            [host]
            pc_ip = "192.168.50.10"

            [iperf]
            server_cmd = "iperf3 -s -i 1"
            client_cmd = "iperf3 -c {ip} -i 1 -t 10 -P 4"

            [rvr]
            repeat = 3
            throughput_threshold = 5.0

            [telnet]
            quiet_window_ms = 500

            [[expected_rate]]
            band = "5G"
            mode = "11AX"
            bandwidth = "80MHZ"
            security = "WPA2"
            dl = 600
            ul = 550
        "#;
        let cfg = HarnessConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.device.serial, "ABC123");
        assert_eq!(cfg.device.transport, DeviceTransportKind::Telnet);
        assert_eq!(cfg.device.telnet_port, 23);
        assert_eq!(cfg.rvr.repeat, 3);
        assert_eq!(cfg.telnet.quiet_window, Duration::from_millis(500));
        assert_eq!(cfg.iperf.test_tool(), "iperf3");
        assert_eq!(cfg.expected_rates.len(), 1);
        assert_eq!(cfg.expected_rates[0].ul, 550.0);
    }

    #[test]
    fn repeat_is_bounded() {
        let cfg = HarnessConfig::from_toml_str(&format!("[rvr]\nrepeat = {MAX_REPEAT}\n")).unwrap();
        assert_eq!(cfg.rvr.repeat, MAX_REPEAT);
        let err = HarnessConfig::from_toml_str("[rvr]\nrepeat = 4294967295\n").unwrap_err();
        assert!(err.to_string().contains("rvr.repeat"), "{err}");
    }

    #[test]
    fn telnet_transport_requires_dut_ip() {
        let err = HarnessConfig::from_toml_str("[device]\ntransport = \"telnet\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_transport_rejected() {
        let err = HarnessConfig::from_toml_str("[device]\ntransport = \"serial\"\n").unwrap_err();
        assert!(err.to_string().contains("serial"));
    }

    #[test]
    fn expected_rate_row_needs_both_directions() {
        let toml = r#"
            [[expected_rate]]
            band = "2.4G"
            dl = 100
        "#;
        assert!(HarnessConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn negative_threshold_rejected() {
        let toml = "[rvr]\nthroughput_threshold = -1.0\n";
        assert!(HarnessConfig::from_toml_str(toml).is_err());
    }
}
