//! Shared types for the wifibench throughput harness.
//!
//! This crate contains:
//! - **Data models** — directions, protocols, iperf metrics, run records, result rows
//! - **Configuration** — TOML harness config with validated defaults
//! - **Errors** — configuration failures shared by every other crate

pub mod config;
pub mod error;
pub mod models;

pub use config::HarnessConfig;
pub use error::ConfigError;
pub use models::{Direction, IperfMetrics, IperfRole, LinkDescriptor, Protocol, ResultRow, RunRecord};
