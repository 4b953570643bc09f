//! wifibench
//!
//! Thin driver over the measurement library:
//!
//! - `measure` runs one session (RX, TX or both) and appends rows to the result log
//! - `parse` runs the throughput parser over a captured iperf log
//! - `WIFIBENCH_DEBUG=1` or `--debug` synthesizes values instead of running iperf

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wifibench_agent::{
    DEBUG_ENV, IperfLoadGenerator, MeasureContext, ResultLog, ThroughputAggregator, debug_flag,
};
use wifibench_common::{Direction, HarnessConfig, LinkDescriptor, Protocol};
use wifibench_iperf::LogParser;

/// Wi-Fi throughput measurement harness.
#[derive(Parser, Debug)]
#[command(name = "wifibench", about = "Wi-Fi throughput measurement harness")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Measure throughput against the configured DUT.
    Measure(MeasureArgs),
    /// Parse a captured iperf server log and print the metrics as JSON.
    Parse {
        file: PathBuf,
        /// Parallel stream count the run used (`-P`).
        #[arg(short = 'P', long, default_value_t = 1)]
        parallel: u32,
        /// Nominal duration in seconds (`-t`).
        #[arg(short = 't', long, default_value_t = 0)]
        duration: u32,
    },
}

#[derive(clap::Args, Debug)]
struct MeasureArgs {
    /// Harness config (TOML).
    #[arg(long)]
    config: PathBuf,

    /// rx, tx, or both when omitted.
    #[arg(long)]
    direction: Option<Direction>,

    #[arg(long, default_value = "tcp")]
    protocol: Protocol,

    /// Synthesize values instead of running iperf.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Frequency band, e.g. `5G`.
    #[arg(long)]
    band: String,

    #[arg(long, default_value = "11AX")]
    mode: String,

    #[arg(long, default_value = "80MHz")]
    bandwidth: String,

    #[arg(long, default_value = "WPA2")]
    security: String,

    #[arg(long, default_value = "")]
    channel: String,

    /// Attenuation setting for the `DB` column.
    #[arg(long, default_value = "")]
    db: String,

    /// Turntable angle.
    #[arg(long, default_value = "")]
    angle: String,

    #[arg(long)]
    profile_mode: Option<String>,

    #[arg(long)]
    profile_value: Option<String>,

    #[arg(long)]
    scenario: Option<String>,

    /// Prefix the result file name, e.g. `RVR`.
    #[arg(long)]
    test_type: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Measure(args) => measure(args),
        Command::Parse {
            file,
            parallel,
            duration,
        } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let lines: Vec<&str> = text.lines().collect();
            let metrics = LogParser::new(parallel, duration).parse(&lines);
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
    }
}

fn measure(args: MeasureArgs) -> anyhow::Result<()> {
    let mut config = HarnessConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if args.debug || debug_flag(std::env::var(DEBUG_ENV).ok().as_deref()) {
        config.rvr.debug = true;
    }

    tracing::info!(
        serial = %config.device.serial,
        repeat = config.rvr.repeat,
        debug = config.rvr.debug,
        "wifibench starting"
    );

    let mut sink = ResultLog::create(&config.report_dir, config.rvr.repeat)?;
    if let Some(test_type) = &args.test_type {
        sink.ensure_prefix(test_type);
    }
    sink.set_active_profile(args.profile_mode.as_deref(), args.profile_value.as_deref());
    sink.set_scenario_group_key(args.scenario.as_deref());

    let generator = IperfLoadGenerator::from_config(&config);
    let mut aggregator = ThroughputAggregator::new(generator, sink, &config);

    let ctx = MeasureContext {
        link: LinkDescriptor {
            band: args.band,
            wireless_mode: args.mode,
            bandwidth: args.bandwidth,
            security_mode: args.security,
            channel: args.channel,
        },
        protocol: args.protocol,
        db_setting: args.db,
        angle: args.angle,
    };

    let directions = match args.direction {
        Some(direction) => vec![direction],
        None => vec![Direction::Rx, Direction::Tx],
    };
    for direction in directions {
        let report = aggregator.measure(direction, &ctx)?;
        println!(
            "{} {}: {} Mbps (expected {}, mcs {})",
            direction.label(),
            ctx.protocol,
            report.summary(),
            report.expected_rate,
            report.mcs.as_deref().unwrap_or("NULL"),
        );
    }
    println!("results: {}", aggregator.sink().path().display());
    Ok(())
}
