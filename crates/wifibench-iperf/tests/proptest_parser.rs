//! Property-based tests for the throughput log parser.
//!
//! Unit conversion must be exact, analysis must be deterministic, and an
//! interval seen several times must count once.

use proptest::prelude::*;
use wifibench_iperf::LogParser;
use wifibench_iperf::parser::to_mbps;

// ─── Strategies ──────────────────────────────────────────────────────────────

/// Rates as iperf prints them: one decimal, up to 10 Gbit/s in Mbit/s terms.
fn tenths() -> impl Strategy<Value = u32> {
    0u32..100_000
}

/// A well-formed single-stream interval line.
fn interval_line() -> impl Strategy<Value = String> {
    (0u32..60, 1u32..3, tenths()).prop_map(|(start, span, rate)| {
        format!(
            "[  3] {start}.0-{end}.0 sec  11.2 MBytes  {mbps:.1} Mbits/sec",
            end = start + span,
            mbps = f64::from(rate) / 10.0
        )
    })
}

/// Interval lines mixed with the noise iperf and shells print around them.
fn log_line() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => interval_line(),
        1 => Just("------------------------------------------------------------".to_string()),
        1 => Just("Server listening on TCP port 5001".to_string()),
        1 => Just("[  3] local 192.168.50.20 port 5001 connected with 192.168.50.10".to_string()),
        1 => Just("\x1b[1;32m[SUM]\x1b[0m 0.0-1.0 sec 112 MBytes 940 Mbits/sec".to_string()),
        1 => Just("[  5] 0.0-10.0 sec 1.1 GBytes 941 Mbits/sec 0.021 ms 0/812 (0%)".to_string()),
        1 => "[ -~]{0,40}",
    ]
}

// ─── Unit conversion ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn mbits_pass_through_unchanged(value in 0.0f64..1.0e6) {
        prop_assert_eq!(to_mbps(value, "Mbits/sec"), Some(value));
    }

    #[test]
    fn gbits_kbits_and_bits_scale_exactly(value in 0.0f64..1.0e6) {
        prop_assert_eq!(to_mbps(value, "Gbits/sec"), Some(value * 1000.0));
        prop_assert_eq!(to_mbps(value, "Kbits/sec"), Some(value / 1000.0));
        prop_assert_eq!(to_mbps(value, "bits/sec"), Some(value / 1_000_000.0));
    }

    #[test]
    fn unit_prefix_is_case_insensitive(value in 0.0f64..1.0e6) {
        prop_assert_eq!(to_mbps(value, "gbits/sec"), to_mbps(value, "Gbits/sec"));
        prop_assert_eq!(to_mbps(value, "KBITS/SEC"), to_mbps(value, "Kbits/sec"));
    }

    #[test]
    fn byte_units_are_not_rates(value in 0.0f64..1.0e6) {
        prop_assert_eq!(to_mbps(value, "MBytes"), None);
        prop_assert_eq!(to_mbps(value, "GBytes"), None);
    }
}

// ─── Analysis ────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn analysis_is_deterministic(lines in prop::collection::vec(log_line(), 0..40)) {
        let parser = LogParser::default();
        prop_assert_eq!(parser.analyse(&lines), parser.analyse(&lines));
        prop_assert_eq!(parser.parse(&lines), parser.parse(&lines));
    }

    #[test]
    fn repeated_interval_counts_once(line in interval_line(), copies in 1usize..20) {
        let lines = vec![line; copies];
        let run = LogParser::default().analyse(&lines);
        prop_assert_eq!(run.samples.len(), 1);
        prop_assert_eq!(run.interval_count, 1);
    }

    #[test]
    fn single_interval_rate_survives_rounding(start in 0u32..60, rate in tenths()) {
        let mbps = f64::from(rate) / 10.0;
        let line = format!("[  4] {start}.0-{}.0 sec  11 MBytes  {mbps:.1} Mbits/sec", start + 1);
        let metrics = LogParser::default().parse(&[line]);
        prop_assert_eq!(metrics.throughput_mbps, Some(mbps));
    }

    #[test]
    fn garbage_never_yields_throughput(lines in prop::collection::vec("[a-zA-Z ]{0,60}", 0..20)) {
        let metrics = LogParser::default().parse(&lines);
        prop_assert_eq!(metrics.throughput_mbps, None);
    }
}
