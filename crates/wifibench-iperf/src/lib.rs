//! # wifibench-iperf
//!
//! Running iperf and turning its text output into numbers.
//!
//! ## Crate structure
//!
//! - [`invocation`] — Flags recovered from operator command templates, wait budgets, kill commands
//! - [`log_buffer`] — Append-only line buffer shared between reader threads and the caller
//! - [`runner`] — Server/client launch over any [`wifibench_transport::Transport`]
//! - [`parser`] — Line sanitizing, interval extraction and summary selection

pub mod invocation;
pub mod log_buffer;
pub mod parser;
pub mod runner;

pub use invocation::IperfInvocation;
pub use log_buffer::LogBuffer;
pub use parser::{LogParser, ParsedRun, SampleRole, ThroughputSample};
pub use runner::{ClientExit, IperfRunner, RunFault, ServerHandle};
