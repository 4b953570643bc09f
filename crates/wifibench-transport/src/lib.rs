//! # wifibench-transport
//!
//! Request/response channels to the places commands run.
//!
//! ## Crate structure
//!
//! - [`process`] — Process handles, bounded waits, output capture
//! - [`local`] — Host shell
//! - [`adb`] — Device shell reached through the debug bridge
//! - [`telnet`] — Telnet option filter and the synchronous Telnet bridge
//!
//! Every transport implements [`Transport`]. `execute` is best-effort:
//! failures are logged and surface as `None`, because callers treat
//! command output as telemetry rather than a transaction.

pub mod adb;
pub mod error;
pub mod local;
pub mod process;
pub mod telnet;

use std::time::Duration;

pub use adb::AdbShell;
pub use error::TransportError;
pub use local::LocalShell;
pub use process::{ProcessExit, ProcessHandle};
pub use telnet::{TcpDialer, TelnetBridge, TelnetShell};

/// A command target.
///
/// At most one command is in flight per transport; methods take
/// `&mut self` so the borrow checker enforces it.
pub trait Transport: Send {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Run `command` to completion and return its captured text.
    ///
    /// `timeout` defaults to a transport-specific budget. Returns `None`
    /// when the command could not be delivered at all.
    fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Option<String>;

    /// Start a long-running command and hand back its process handle.
    fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError>;

    /// Whether `run_client`-style blocking runs should go through
    /// [`Transport::execute`] instead of a spawned process.
    fn prefers_execute(&self) -> bool {
        false
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Option<String> {
        (**self).execute(command, timeout)
    }

    fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError> {
        (**self).spawn(command)
    }

    fn prefers_execute(&self) -> bool {
        (**self).prefers_execute()
    }
}
