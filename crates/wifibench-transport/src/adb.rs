//! Device shell over the debug bridge.
//!
//! Both operations shell out to the host's `adb` binary; the device's
//! output arrives on the local child's pipes.

use std::time::Duration;

use crate::error::TransportError;
use crate::local::{LocalShell, DEFAULT_COMMAND_TIMEOUT};
use crate::process::ProcessHandle;
use crate::Transport;

#[derive(Debug, Clone)]
pub struct AdbShell {
    serial: String,
    adb: String,
    host: LocalShell,
}

impl AdbShell {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            adb: "adb".into(),
            host: LocalShell::new(),
        }
    }

    /// Use a specific adb binary instead of the one on `PATH`.
    pub fn with_adb_binary(mut self, adb: impl Into<String>) -> Self {
        self.adb = adb.into();
        self
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn base_argv(&self) -> Vec<String> {
        vec![self.adb.clone(), "-s".into(), self.serial.clone(), "shell".into()]
    }

    /// argv for a one-shot command; the device shell receives it as one string.
    fn execute_argv(&self, command: &str) -> Vec<String> {
        let mut argv = self.base_argv();
        argv.push(command.to_string());
        argv
    }

    /// argv for a long-running command, split the way the template was written.
    fn spawn_argv(&self, command: &str) -> Vec<String> {
        let mut argv = self.base_argv();
        argv.extend(command.split_whitespace().map(str::to_string));
        argv
    }
}

impl Transport for AdbShell {
    fn name(&self) -> &str {
        &self.serial
    }

    fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Option<String> {
        if command.trim().is_empty() {
            return None;
        }
        let argv = self.execute_argv(command);
        match self
            .host
            .run_argv(&argv, timeout.unwrap_or(DEFAULT_COMMAND_TIMEOUT))
        {
            Ok(output) => {
                if output.stderr.contains("error: device") || output.stderr.contains("error: no devices") {
                    tracing::warn!(serial = %self.serial, stderr = %output.stderr.trim(), "adb reports device unavailable");
                    return None;
                }
                Some(output.combined())
            }
            Err(e) => {
                tracing::warn!(serial = %self.serial, command, error = %e, "adb shell command failed");
                None
            }
        }
    }

    fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError> {
        if command.trim().is_empty() {
            return Err(TransportError::EmptyCommand);
        }
        self.host.spawn_argv(&self.spawn_argv(command))
    }
}
