//! iperf command templates.
//!
//! Templates are free-form operator strings such as
//! `iperf -c {ip} -w 2m -i 1 -t 30 -P 5`. Only a handful of flags are
//! recovered from them; everything else passes through untouched.

use std::time::Duration;

use wifibench_common::{IperfRole, Protocol};

/// Placeholder replaced by the peer address.
pub const IP_PLACEHOLDER: &str = "{ip}";

pub const DEFAULT_DURATION_SECS: u32 = 30;
pub const DEFAULT_PARALLEL: u32 = 1;

/// One concrete load-generation request, fixed for the run's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IperfInvocation {
    pub role: IperfRole,
    pub protocol: Protocol,
    /// Address after `-c`, if any.
    pub target: Option<String>,
    /// `-P` stream count.
    pub parallel: u32,
    /// `-t` nominal duration.
    pub duration_secs: u32,
    /// The command with placeholders substituted.
    pub command: String,
}

impl IperfInvocation {
    pub fn from_template(template: &str, peer_ip: &str) -> Self {
        let command = template.replace(IP_PLACEHOLDER, peer_ip).trim().to_string();
        let tokens: Vec<&str> = command.split_whitespace().collect();

        let role = if has_flag(&tokens, "-s") {
            IperfRole::Server
        } else {
            IperfRole::Client
        };
        let protocol = if has_flag(&tokens, "-u") {
            Protocol::Udp
        } else {
            Protocol::Tcp
        };

        Self {
            role,
            protocol,
            target: flag_value(&tokens, "-c").map(str::to_string),
            parallel: numeric_flag(&tokens, "-P").unwrap_or(DEFAULT_PARALLEL),
            duration_secs: numeric_flag(&tokens, "-t").unwrap_or(DEFAULT_DURATION_SECS),
            command,
        }
    }

    /// Executable name without directory or `.exe`, e.g. `iperf3`.
    pub fn tool(&self) -> &str {
        let exe = self.command.split_whitespace().next().unwrap_or("");
        let base = exe.rsplit(['/', '\\']).next().unwrap_or(exe);
        base.strip_suffix(".exe").unwrap_or(base)
    }

    /// Bound on how long a client run may take before it is killed.
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(wait_time_secs(self.duration_secs))
    }
}

/// `max(d, 1) + clamp(d / 2, 15, 120)`, integer seconds.
pub fn wait_time_secs(duration_secs: u32) -> u64 {
    let safe = u64::from(duration_secs.max(1));
    safe + (safe / 2).clamp(15, 120)
}

/// Stale-process cleanup on the device shell.
pub fn device_kill_command(tool: &str) -> String {
    format!("killall -9 {tool}")
}

/// Stale-process cleanup on the host.
pub fn host_kill_command(tool: &str) -> String {
    if cfg!(windows) {
        format!("taskkill /im {tool}.exe -f")
    } else {
        format!("killall -9 {tool}")
    }
}

fn has_flag(tokens: &[&str], flag: &str) -> bool {
    tokens.iter().any(|t| *t == flag)
}

fn flag_value<'a>(tokens: &[&'a str], flag: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|t| *t == flag)
        .and_then(|i| tokens.get(i + 1).copied())
}

fn numeric_flag(tokens: &[&str], flag: &str) -> Option<u32> {
    flag_value(tokens, flag).and_then(|v| v.parse().ok())
}
