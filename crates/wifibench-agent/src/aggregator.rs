//! Repeated-run aggregation.
//!
//! Each call measures one direction: up to `repeat + 2` attempts to keep
//! `repeat + 1` records, then exactly one result row. A direction whose
//! first kept run falls below the throughput threshold is skipped for
//! the rest of the session.

use std::collections::HashSet;

use rand::RngExt as _;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use wifibench_common::{
    Direction, HarnessConfig, IperfMetrics, LinkDescriptor, Protocol, ResultRow, RunRecord,
};

use crate::error::HarnessError;
use crate::expected_rate::ExpectedRateTable;
use crate::generator::LoadGenerator;
use crate::sink::{self, ResultLog};

/// MCS label attached to synthesized records.
pub const DEBUG_MCS: &str = "DEBUG";

/// Labels for one measurement call that are not part of the run itself.
#[derive(Debug, Clone, Default)]
pub struct MeasureContext {
    pub link: LinkDescriptor,
    pub protocol: Protocol,
    /// Attenuation setting, written to the `DB` column.
    pub db_setting: String,
    /// Turntable angle, written to the `Angel` column.
    pub angle: String,
}

/// Outcome of one RX or TX call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionReport {
    pub direction: Direction,
    /// Exactly `repeat + 1` cells, in run order.
    pub cells: Vec<String>,
    pub records: Vec<RunRecord>,
    pub mcs: Option<String>,
    pub expected_rate: f64,
    pub skipped: bool,
}

impl DirectionReport {
    /// Non-empty cells joined with `,`, or `0`.
    pub fn summary(&self) -> String {
        let joined = self
            .cells
            .iter()
            .filter(|c| !c.is_empty())
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(",");
        if joined.is_empty() { "0".into() } else { joined }
    }
}

pub struct ThroughputAggregator<G> {
    generator: G,
    sink: ResultLog,
    expected: ExpectedRateTable,
    serial_number: String,
    rssi: i32,
    repeat: u32,
    threshold: f64,
    debug: bool,
    rng: StdRng,
    skipped: HashSet<Direction>,
}

impl<G: LoadGenerator> ThroughputAggregator<G> {
    /// The repeat count comes from `sink`, which fixes the row width.
    pub fn new(generator: G, sink: ResultLog, config: &HarnessConfig) -> Self {
        let seed = config.rvr.debug_seed.unwrap_or_else(rand::random);
        if sink.repeat() != config.rvr.repeat {
            tracing::warn!(
                sink_repeat = sink.repeat(),
                config_repeat = config.rvr.repeat,
                "result log repeat differs from config, using the result log's"
            );
        }
        Self {
            repeat: sink.repeat(),
            generator,
            sink,
            expected: ExpectedRateTable::new(&config.expected_rates),
            serial_number: config.device.serial.clone(),
            rssi: config.device.rssi,
            threshold: config.rvr.throughput_threshold,
            debug: config.rvr.debug,
            rng: StdRng::seed_from_u64(seed),
            skipped: HashSet::new(),
        }
    }

    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    pub fn is_skipped(&self, direction: Direction) -> bool {
        self.skipped.contains(&direction)
    }

    /// Forget skip flags, e.g. when a new session starts on the same log.
    pub fn reset_skips(&mut self) {
        self.skipped.clear();
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn sink(&self) -> &ResultLog {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut ResultLog {
        &mut self.sink
    }

    /// Measure `direction`, append its row and report the cells.
    ///
    /// Lookup and sink failures are errors; run failures only leave
    /// blank or zero cells.
    pub fn measure(
        &mut self,
        direction: Direction,
        ctx: &MeasureContext,
    ) -> Result<DirectionReport, HarnessError> {
        let expected_rate = self.expected.lookup(&ctx.link, direction)?;
        let width = self.sink.throughput_width();

        if self.is_skipped(direction) {
            tracing::info!(%direction, "direction skipped after a low first run, writing zero row");
            let report = DirectionReport {
                direction,
                cells: sink::normalize_cells(vec!["0".into()], width),
                records: Vec::new(),
                mcs: None,
                expected_rate,
                skipped: true,
            };
            self.write_row(&report, ctx, None)?;
            return Ok(report);
        }

        let records = if self.debug {
            vec![self.synthesize()]
        } else {
            self.run_attempts(direction)
        };

        if let Some(first) = records.first() {
            let first_mbps = first.metrics.throughput_mbps.unwrap_or(0.0);
            if first_mbps < self.threshold {
                tracing::warn!(
                    %direction,
                    first_mbps,
                    threshold = self.threshold,
                    "first run below threshold, skipping this direction from now on"
                );
                self.skipped.insert(direction);
            }
        }

        let entries: Vec<String> = records
            .iter()
            .filter_map(|r| r.metrics.formatted_throughput())
            .collect();
        let cells = if entries.is_empty() {
            vec!["0".to_string(); width.max(1)]
        } else {
            sink::normalize_cells(entries, width)
        };

        let report = DirectionReport {
            direction,
            cells,
            mcs: records.last().and_then(|r| r.mcs.clone()),
            records,
            expected_rate,
            skipped: false,
        };
        let last = report.records.last().map(|r| &r.metrics);
        self.write_row(&report, ctx, last)?;
        tracing::info!(
            %direction,
            protocol = %ctx.protocol,
            kept = report.records.len(),
            summary = %report.summary(),
            "direction measured"
        );
        Ok(report)
    }

    fn run_attempts(&mut self, direction: Direction) -> Vec<RunRecord> {
        let wanted = self.repeat as usize + 1;
        let mut records = Vec::with_capacity(wanted);
        for attempt in 0..=self.repeat.saturating_add(1) {
            self.generator.kill_stale();
            let metrics = match self.generator.measure(direction) {
                Ok(metrics) => metrics,
                Err(fault) => {
                    tracing::warn!(%direction, attempt, error = %fault, "run failed, retrying");
                    continue;
                }
            };
            if attempt == 0 && metrics.throughput_mbps.is_none() {
                tracing::warn!(%direction, "first attempt produced no throughput, discarding");
                continue;
            }
            let mcs = self.generator.query_mcs(direction);
            records.push(RunRecord { metrics, mcs });
            if records.len() >= wanted {
                break;
            }
        }
        if records.len() < wanted {
            tracing::warn!(%direction, kept = records.len(), wanted, "attempt budget exhausted");
        }
        records
    }

    fn synthesize(&mut self) -> RunRecord {
        let raw = 100.0 + self.rng.random::<f64>() * 100.0;
        let mbps = (raw * 100.0).round() / 100.0;
        tracing::info!(mbps, "debug mode, synthesized throughput");
        RunRecord {
            metrics: IperfMetrics::with_throughput(mbps),
            mcs: Some(DEBUG_MCS.into()),
        }
    }

    fn write_row(
        &self,
        report: &DirectionReport,
        ctx: &MeasureContext,
        last: Option<&IperfMetrics>,
    ) -> Result<(), HarnessError> {
        let row = ResultRow {
            serial_number: self.serial_number.clone(),
            standard: ctx.link.wireless_mode.clone(),
            band: ctx.link.band.clone(),
            bandwidth: ctx.link.bandwidth.clone(),
            channel: ctx.link.channel.clone(),
            protocol: ctx.protocol,
            direction: report.direction,
            db_setting: ctx.db_setting.clone(),
            rssi: self.rssi,
            angle: ctx.angle.clone(),
            mcs: report.mcs.clone(),
            throughput_cells: report.cells.clone(),
            expected_rate: report.expected_rate,
            latency_ms: last.and_then(|m| m.latency_ms),
            packet_loss: last.and_then(|m| m.packet_loss.clone()),
        };
        self.sink.append(&row)
    }
}
