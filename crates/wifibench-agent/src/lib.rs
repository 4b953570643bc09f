//! # wifibench-agent
//!
//! Turns single iperf runs into per-direction result rows.
//!
//! ## Crate structure
//!
//! - [`generator`] — The [`LoadGenerator`] seam and the iperf-backed implementation
//! - [`aggregator`] — Attempt budget, skip policy, debug mode, fixed-width cells
//! - [`expected_rate`] — Reference throughput lookup by band/mode/bandwidth/security
//! - [`mcs`] — Post-run MCS query against the DUT
//! - [`sink`] — Append-only CSV result log with profile and scenario tags

pub mod aggregator;
pub mod error;
pub mod expected_rate;
pub mod generator;
pub mod mcs;
pub mod sink;

pub use aggregator::{DirectionReport, MeasureContext, ThroughputAggregator};
pub use error::HarnessError;
pub use expected_rate::ExpectedRateTable;
pub use generator::{IperfLoadGenerator, LoadGenerator};
pub use mcs::McsProbe;
pub use sink::ResultLog;

/// Environment switch that forces debug (simulation) mode.
pub const DEBUG_ENV: &str = "WIFIBENCH_DEBUG";

/// Whether a `WIFIBENCH_DEBUG` value turns debug mode on.
pub fn debug_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_values() {
        assert!(debug_flag(Some("1")));
        assert!(debug_flag(Some(" TRUE ")));
        assert!(!debug_flag(Some("0")));
        assert!(!debug_flag(Some("")));
        assert!(!debug_flag(None));
    }
}
