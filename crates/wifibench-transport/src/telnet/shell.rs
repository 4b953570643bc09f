use std::time::Duration;

use wifibench_common::config::TelnetConfig;

use super::bridge::{Dialer, TcpDialer, TelnetBridge};
use crate::error::TransportError;
use crate::process::ProcessHandle;
use crate::Transport;

/// Remote shell reached over Telnet.
///
/// One-shot commands share the shell's session. Each `spawn` opens a
/// sibling session so a long-running server never blocks `execute`.
pub struct TelnetShell<D: Dialer = TcpDialer> {
    bridge: TelnetBridge<D>,
    label: String,
}

impl TelnetShell<TcpDialer> {
    pub fn connect(host: &str, port: u16, settings: TelnetConfig) -> Self {
        Self::new(TelnetBridge::tcp(host, port, settings))
    }
}

impl<D: Dialer> TelnetShell<D> {
    pub fn new(bridge: TelnetBridge<D>) -> Self {
        let label = format!("telnet:{}", bridge.target());
        Self { bridge, label }
    }

    pub fn bridge_mut(&mut self) -> &mut TelnetBridge<D> {
        &mut self.bridge
    }

    /// Block until the endpoint accepts sessions again, e.g. after a reboot.
    pub fn wait_reconnect(&mut self, timeout: Duration, interval: Duration) -> bool {
        self.bridge.wait_reconnect(timeout, interval)
    }

    pub fn close(&mut self) {
        self.bridge.close();
    }
}

impl<D: Dialer> Transport for TelnetShell<D> {
    fn name(&self) -> &str {
        &self.label
    }

    fn execute(&mut self, command: &str, timeout: Option<Duration>) -> Option<String> {
        self.bridge.execute(command, timeout)
    }

    fn spawn(&mut self, command: &str) -> Result<Box<dyn ProcessHandle>, TransportError> {
        if command.trim().is_empty() {
            return Err(TransportError::EmptyCommand);
        }
        let stream = self.bridge.sibling().stream(command)?;
        Ok(Box::new(stream))
    }

    fn prefers_execute(&self) -> bool {
        true
    }
}
