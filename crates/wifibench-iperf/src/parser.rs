//! Throughput log parser.
//!
//! Turns one run's captured lines into [`IperfMetrics`]. iperf2, iperf3
//! and vendor builds disagree on layout, so lines are matched loosely:
//!
//! - interval lines: `<start> - <end> sec ... <rate> [KMG]bits/sec`
//! - UDP report lines: a jitter `N ms` plus a loss fraction `N/M (P%)`
//! - `[SUM]` lines aggregate parallel streams
//!
//! Selection order: the summary line (start near 0, spanning more than
//! 1.5 s), then the mean of `[SUM]` intervals, then the mean of all
//! per-interval values, then the UDP report's own rate. Parsing never
//! fails; unrecognisable input yields empty metrics.

use std::collections::HashMap;

use serde::Serialize;
use wifibench_common::IperfMetrics;

use crate::invocation::IperfInvocation;

const SUM_MARKER: &str = "[SUM]";

/// Start offsets below this count as "from the beginning".
const SUMMARY_MAX_START: f64 = 0.5;
/// Spans above this count as "the whole run".
const SUMMARY_MIN_SPAN: f64 = 1.5;

// ── Line cleanup ────────────────────────────────────────────────────

/// Strip ANSI CSI sequences and control characters, then trim.
pub fn sanitize_line(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b {
            if let Some(len) = csi_len(&bytes[i..]) {
                i += len;
                continue;
            }
        }
        let Some(ch) = text[i..].chars().next() else {
            break;
        };
        i += ch.len_utf8();
        if (ch as u32) < 0x20 || ch == '\x7f' {
            continue;
        }
        out.push(ch);
    }
    out.trim().to_string()
}

/// Length of `ESC [ [0-9;]* <letter>` at the start of `b`.
fn csi_len(b: &[u8]) -> Option<usize> {
    if b.get(1) != Some(&b'[') {
        return None;
    }
    let mut j = 2;
    while b.get(j).is_some_and(|c| c.is_ascii_digit() || *c == b';') {
        j += 1;
    }
    b.get(j).filter(|c| c.is_ascii_alphabetic()).map(|_| j + 1)
}

/// Convert an iperf rate to Mbit/s. `None` for units that are not bit rates.
pub fn to_mbps(value: f64, unit: &str) -> Option<f64> {
    let unit = unit.to_ascii_lowercase();
    if !unit.contains("bits/sec") {
        return None;
    }
    match unit.as_bytes().first() {
        Some(b'g') => Some(value * 1000.0),
        Some(b'm') => Some(value),
        Some(b'k') => Some(value / 1000.0),
        Some(b'b') => Some(value / 1_000_000.0),
        _ => None,
    }
}

// ── Pattern scanning ────────────────────────────────────────────────

/// Hand-rolled matcher over the ASCII skeleton of a line.
struct Scan<'a> {
    b: &'a [u8],
    pos: usize,
}

impl<'a> Scan<'a> {
    fn at(b: &'a [u8], pos: usize) -> Self {
        Self { b, pos }
    }

    fn peek(&self) -> Option<u8> {
        self.b.get(self.pos).copied()
    }

    fn digits(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn byte(&mut self, want: u8) -> bool {
        if self.peek() == Some(want) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word_ci(&mut self, word: &str) -> bool {
        let end = self.pos + word.len();
        match self.b.get(self.pos..end) {
            Some(s) if s.eq_ignore_ascii_case(word.as_bytes()) => {
                self.pos = end;
                true
            }
            _ => false,
        }
    }

    /// `\d+(\.\d+)?`; with `loose_fraction`, `\d+(\.\d*)?`.
    fn number(&mut self, loose_fraction: bool) -> Option<(usize, usize)> {
        let start = self.pos;
        if !self.digits() {
            return None;
        }
        if self.peek() == Some(b'.') {
            let dot = self.pos;
            self.pos += 1;
            if !self.digits() && !loose_fraction {
                self.pos = dot;
            }
        }
        Some((start, self.pos))
    }
}

/// Leftmost match of `matcher` starting at a digit.
fn search<'a, T>(line: &'a str, matcher: impl Fn(&'a str, usize) -> Option<T>) -> Option<T> {
    let b = line.as_bytes();
    (0..b.len())
        .filter(|&i| b[i].is_ascii_digit())
        .find_map(|i| matcher(line, i))
}

/// `<start> - <end> sec`, as raw text.
fn find_interval(line: &str) -> Option<(&str, &str)> {
    search(line, |line, i| {
        let mut s = Scan::at(line.as_bytes(), i);
        let (a0, a1) = s.number(true)?;
        s.ws();
        s.byte(b'-').then_some(())?;
        s.ws();
        let (b0, b1) = s.number(true)?;
        s.ws();
        s.word_ci("sec").then_some(())?;
        Some((&line[a0..a1], &line[b0..b1]))
    })
}

/// First `<value> [KMG]bits/sec`, converted to Mbit/s.
fn find_rate(line: &str) -> Option<f64> {
    let (value, unit) = search(line, |line, i| {
        let mut s = Scan::at(line.as_bytes(), i);
        let (n0, n1) = s.number(false)?;
        s.ws();
        let unit_start = s.pos;
        if matches!(s.peek(), Some(b'K' | b'M' | b'G' | b'k' | b'm' | b'g')) {
            s.pos += 1;
        }
        s.word_ci("bits/sec").then_some(())?;
        Some((&line[n0..n1], &line[unit_start..s.pos]))
    })?;
    to_mbps(value.parse().ok()?, unit)
}

/// First `<value> ms`.
fn find_jitter(line: &str) -> Option<f64> {
    search(line, |line, i| {
        let mut s = Scan::at(line.as_bytes(), i);
        let (n0, n1) = s.number(false)?;
        s.ws();
        s.word_ci("ms").then_some(())?;
        line[n0..n1].parse().ok()
    })
}

/// First `N/M (P%)`, whitespace removed.
fn find_loss(line: &str) -> Option<String> {
    search(line, |line, i| {
        let mut s = Scan::at(line.as_bytes(), i);
        s.digits().then_some(())?;
        s.ws();
        s.byte(b'/').then_some(())?;
        s.ws();
        s.digits().then_some(())?;
        s.ws();
        s.byte(b'(').then_some(())?;
        s.ws();
        s.number(false)?;
        s.ws();
        s.byte(b'%');
        s.ws();
        s.byte(b')').then_some(())?;
        Some(line[i..s.pos].split_whitespace().collect())
    })
}

/// UDP report line: jitter and loss present, rate optional.
pub fn udp_metrics(line: &str) -> Option<IperfMetrics> {
    let jitter = find_jitter(line)?;
    let loss = find_loss(line)?;
    Some(IperfMetrics {
        throughput_mbps: find_rate(line),
        latency_ms: Some(jitter),
        packet_loss: Some(loss),
    })
}

// ── Samples ─────────────────────────────────────────────────────────

/// Role hint carried by an interval line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRole {
    Sender,
    Receiver,
    /// `[SUM]` line without a sender/receiver hint.
    Sum,
    None,
}

impl SampleRole {
    fn of(line: &str) -> Self {
        let lower = line.to_ascii_lowercase();
        if lower.contains("receiver") {
            SampleRole::Receiver
        } else if lower.contains("sender") {
            SampleRole::Sender
        } else if line.contains(SUM_MARKER) {
            SampleRole::Sum
        } else {
            SampleRole::None
        }
    }
}

/// One de-duplicated interval measurement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThroughputSample {
    pub start: f64,
    pub end: f64,
    pub mbps: f64,
    pub role: SampleRole,
}

/// Latest value per role for one `(start, end)` key.
#[derive(Debug, Default)]
struct RoleSlots {
    receiver: Option<f64>,
    sender: Option<f64>,
    /// Untagged and `[SUM]` lines.
    none: Option<f64>,
    sum_tagged: bool,
}

impl RoleSlots {
    fn set(&mut self, role: SampleRole, mbps: f64) {
        match role {
            SampleRole::Receiver => self.receiver = Some(mbps),
            SampleRole::Sender => self.sender = Some(mbps),
            SampleRole::Sum => {
                self.none = Some(mbps);
                self.sum_tagged = true;
            }
            SampleRole::None => {
                self.none = Some(mbps);
                self.sum_tagged = false;
            }
        }
    }

    fn pick(&self, prefer_receiver: bool) -> Option<f64> {
        if prefer_receiver {
            self.receiver.or(self.none)
        } else {
            self.none.or(self.sender)
        }
    }
}

struct Interval {
    start: f64,
    end: f64,
    slots: RoleSlots,
}

// ── Analysis ────────────────────────────────────────────────────────

/// Everything learned from one snapshot, before rounding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedRun {
    pub samples: Vec<ThroughputSample>,
    /// Chosen throughput, unrounded.
    pub throughput_mbps: Option<f64>,
    /// Last UDP report line seen.
    pub udp: Option<IperfMetrics>,
    /// Intervals that contributed a value under the dominant role.
    pub interval_count: usize,
    pub has_summary: bool,
}

impl ParsedRun {
    /// Final metrics: throughput to 0.1 Mbit/s, latency to 1 µs.
    pub fn metrics(&self) -> IperfMetrics {
        let mut metrics = self.udp.clone().unwrap_or_default();
        metrics.throughput_mbps = self.throughput_mbps.map(|v| round_to(v, 1));
        metrics.latency_ms = metrics.latency_ms.map(|v| round_to(v, 3));
        metrics
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Parser configured for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogParser {
    /// `-P` stream count; above 1 only `[SUM]` lines are intervals.
    pub parallel: u32,
    /// Nominal duration, used only for the short-output warning.
    pub expected_intervals: u32,
}

impl Default for LogParser {
    fn default() -> Self {
        Self {
            parallel: 1,
            expected_intervals: 0,
        }
    }
}

impl LogParser {
    pub fn new(parallel: u32, expected_intervals: u32) -> Self {
        Self {
            parallel,
            expected_intervals,
        }
    }

    pub fn for_invocation(invocation: &IperfInvocation) -> Self {
        Self::new(invocation.parallel, invocation.duration_secs)
    }

    pub fn analyse<S: AsRef<str>>(&self, lines: &[S]) -> ParsedRun {
        let mut intervals: Vec<Interval> = Vec::new();
        let mut index: HashMap<(String, String), usize> = HashMap::new();
        let mut summary_key: Option<usize> = None;
        let mut sum_values: Vec<f64> = Vec::new();
        let mut udp: Option<IperfMetrics> = None;

        for raw in lines {
            let line = sanitize_line(raw.as_ref());
            if line.is_empty() {
                continue;
            }
            let is_sum = line.contains(SUM_MARKER);
            if let Some(metrics) = udp_metrics(&line) {
                udp = Some(metrics);
            }
            if !is_sum && self.parallel != 1 {
                continue;
            }
            let Some((start_text, end_text)) = find_interval(&line) else {
                continue;
            };
            let Some(mbps) = find_rate(&line) else {
                continue;
            };
            let start: f64 = start_text.parse().unwrap_or(0.0);
            let end: f64 = end_text.parse().unwrap_or(0.0);

            let key = (start_text.to_string(), end_text.to_string());
            let slot = *index.entry(key).or_insert_with(|| {
                intervals.push(Interval {
                    start,
                    end,
                    slots: RoleSlots::default(),
                });
                intervals.len() - 1
            });
            intervals[slot].slots.set(SampleRole::of(&line), mbps);

            if start < SUMMARY_MAX_START && end - start > SUMMARY_MIN_SPAN {
                summary_key = Some(slot);
            } else if is_sum {
                sum_values.push(mbps);
            }
        }

        let prefer_receiver = intervals.iter().any(|iv| iv.slots.receiver.is_some());
        let values: Vec<f64> = intervals
            .iter()
            .filter_map(|iv| iv.slots.pick(prefer_receiver))
            .collect();
        let summary = summary_key.and_then(|i| intervals[i].slots.pick(prefer_receiver));

        let throughput_mbps = summary
            .or_else(|| mean(&sum_values))
            .or_else(|| mean(&values))
            .or_else(|| udp.as_ref().and_then(|m| m.throughput_mbps));

        ParsedRun {
            samples: intervals.iter().flat_map(samples_of).collect(),
            throughput_mbps,
            udp,
            interval_count: values.len(),
            has_summary: summary_key.is_some(),
        }
    }

    /// Analyse, warn about thin output, and round.
    pub fn parse<S: AsRef<str>>(&self, lines: &[S]) -> IperfMetrics {
        let run = self.analyse(lines);
        if !run.has_summary {
            if run.interval_count == 0 {
                tracing::warn!(lines = lines.len(), "iperf output did not contain interval lines");
            } else if self.expected_intervals > 0 && run.interval_count < self.expected_intervals as usize {
                tracing::warn!(
                    intervals = run.interval_count,
                    expected = self.expected_intervals,
                    "iperf output produced fewer intervals than expected"
                );
            }
        }
        run.metrics()
    }
}

fn samples_of(iv: &Interval) -> Vec<ThroughputSample> {
    let none_role = if iv.slots.sum_tagged {
        SampleRole::Sum
    } else {
        SampleRole::None
    };
    [
        (iv.slots.receiver, SampleRole::Receiver),
        (iv.slots.sender, SampleRole::Sender),
        (iv.slots.none, none_role),
    ]
    .into_iter()
    .filter_map(|(mbps, role)| {
        mbps.map(|mbps| ThroughputSample {
            start: iv.start,
            end: iv.end,
            mbps,
            role,
        })
    })
    .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

/// Whether a snapshot already holds the run's final `[SUM]` report, or
/// at least `expected_intervals` distinct `[SUM]` intervals.
pub fn sum_report_complete<S: AsRef<str>>(lines: &[S], expected_intervals: u32) -> bool {
    let min_span = f64::from(expected_intervals.saturating_sub(1)).max(1.0);
    let mut seen: Vec<(String, String)> = Vec::new();
    for raw in lines {
        let line = sanitize_line(raw.as_ref());
        if !line.contains(SUM_MARKER) {
            continue;
        }
        let Some((start_text, end_text)) = find_interval(&line) else {
            continue;
        };
        if let (Ok(start), Ok(end)) = (start_text.parse::<f64>(), end_text.parse::<f64>()) {
            if end - start >= min_span {
                return true;
            }
        }
        let key = (start_text.to_string(), end_text.to_string());
        if !seen.contains(&key) {
            seen.push(key);
        }
    }
    expected_intervals > 0 && seen.len() >= expected_intervals as usize
}
