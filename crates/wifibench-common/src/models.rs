//! Data models for throughput measurement.
//!
//! These types flow between the iperf parser (which produces
//! [`IperfMetrics`]), the repeated-run aggregator (which collects
//! [`RunRecord`]s) and the result sink (which persists [`ResultRow`]s).

use serde::{Deserialize, Serialize};

// ── Direction / protocol ────────────────────────────────────────────

/// Traffic direction relative to the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Downlink: the DUT receives.
    Rx,
    /// Uplink: the DUT transmits.
    Tx,
}

impl Direction {
    /// Column label used in result rows and expected-rate lookups.
    pub fn label(self) -> &'static str {
        match self {
            Direction::Rx => "DL",
            Direction::Tx => "UL",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Rx => write!(f, "rx"),
            Direction::Tx => write!(f, "tx"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RX" | "DL" => Ok(Direction::Rx),
            "TX" | "UL" => Ok(Direction::Tx),
            other => Err(format!("unknown direction: {other}")),
        }
    }
}

/// Transport protocol of a load-generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol: {other}")),
        }
    }
}

/// Role of an iperf process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IperfRole {
    Server,
    Client,
}

impl std::fmt::Display for IperfRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IperfRole::Server => write!(f, "server"),
            IperfRole::Client => write!(f, "client"),
        }
    }
}

// ── Metrics ─────────────────────────────────────────────────────────

/// Normalized outcome of one iperf run.
///
/// Every field is optional: "no data" stays distinguishable from a
/// measured zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IperfMetrics {
    pub throughput_mbps: Option<f64>,
    /// UDP jitter in milliseconds.
    pub latency_ms: Option<f64>,
    /// UDP loss fraction as printed by iperf, e.g. `0/1000(0%)`.
    pub packet_loss: Option<String>,
}

impl IperfMetrics {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_throughput(throughput_mbps: f64) -> Self {
        Self {
            throughput_mbps: Some(throughput_mbps),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.throughput_mbps.is_none() && self.latency_ms.is_none() && self.packet_loss.is_none()
    }

    /// Throughput formatted with one decimal, as written into result cells.
    pub fn formatted_throughput(&self) -> Option<String> {
        self.throughput_mbps.map(|v| format!("{v:.1}"))
    }
}

/// One kept repeat iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub metrics: IperfMetrics,
    /// MCS / rate info queried from the DUT right after the run.
    pub mcs: Option<String>,
}

// ── Link descriptor ─────────────────────────────────────────────────

/// Router / link settings under test.
///
/// Used for result-row labels and the expected-rate lookup only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkDescriptor {
    pub band: String,
    pub wireless_mode: String,
    pub bandwidth: String,
    pub security_mode: String,
    pub channel: String,
}

// ── Result row ──────────────────────────────────────────────────────

/// Final persisted record of one RX or TX measurement call.
///
/// Profile mode/value and the scenario tag are appended by the sink,
/// since they describe the session state rather than the run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub serial_number: String,
    pub standard: String,
    pub band: String,
    pub bandwidth: String,
    pub channel: String,
    pub protocol: Protocol,
    pub direction: Direction,
    pub db_setting: String,
    pub rssi: i32,
    pub angle: String,
    pub mcs: Option<String>,
    /// Fixed width: `repeat_times + 1`, blank-padded.
    pub throughput_cells: Vec<String>,
    pub expected_rate: f64,
    pub latency_ms: Option<f64>,
    pub packet_loss: Option<String>,
}

impl ResultRow {
    pub const TEST_CATEGORY: &'static str = "Throughput";
    pub const DATA_RATE: &'static str = "Rate_Adaptation";
    pub const PATH_LOSS: &'static str = "NULL";

    /// Field values in header order, before profile/scenario columns.
    pub fn values(&self) -> Vec<String> {
        fn first_token(text: &str) -> String {
            text.split_whitespace().next().unwrap_or("").to_string()
        }

        let mut values = vec![
            self.serial_number.clone(),
            Self::TEST_CATEGORY.to_string(),
            first_token(&self.standard),
            first_token(&self.band),
            first_token(&self.bandwidth),
            Self::DATA_RATE.to_string(),
            self.channel.clone(),
            self.protocol.to_string(),
            self.direction.label().to_string(),
            Self::PATH_LOSS.to_string(),
            self.db_setting.clone(),
            self.rssi.to_string(),
            self.angle.clone(),
            self.mcs
                .as_deref()
                .filter(|m| !m.is_empty())
                .unwrap_or("NULL")
                .to_string(),
        ];
        values.extend(self.throughput_cells.iter().cloned());
        values.push(self.expected_rate.to_string());
        values.push(self.latency_ms.map(|v| v.to_string()).unwrap_or_default());
        values.push(self.packet_loss.clone().unwrap_or_default());
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_accepts_both_spellings() {
        assert_eq!("rx".parse::<Direction>().unwrap(), Direction::Rx);
        assert_eq!("DL".parse::<Direction>().unwrap(), Direction::Rx);
        assert_eq!("ul".parse::<Direction>().unwrap(), Direction::Tx);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn formatted_throughput_keeps_one_decimal() {
        assert_eq!(
            IperfMetrics::with_throughput(94.26).formatted_throughput().as_deref(),
            Some("94.3")
        );
        assert_eq!(IperfMetrics::empty().formatted_throughput(), None);
    }

    #[test]
    fn row_values_follow_header_order() {
        let row = ResultRow {
            serial_number: "SN1".into(),
            standard: "11ax (HE)".into(),
            band: "5G".into(),
            bandwidth: "80MHz".into(),
            channel: "36".into(),
            protocol: Protocol::Tcp,
            direction: Direction::Rx,
            db_setting: "10".into(),
            rssi: -42,
            angle: String::new(),
            mcs: None,
            throughput_cells: vec!["95.0".into(), String::new()],
            expected_rate: 600.0,
            latency_ms: None,
            packet_loss: None,
        };
        let values = row.values();
        assert_eq!(values[2], "11ax");
        assert_eq!(values[8], "DL");
        assert_eq!(values[13], "NULL");
        assert_eq!(&values[14..16], &["95.0".to_string(), String::new()]);
        assert_eq!(values[16], "600");
        assert_eq!(values.len(), 19);
    }
}
