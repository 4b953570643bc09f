use std::thread;
use std::time::Duration;

use wifibench_common::Direction;
use wifibench_common::config::McsConfig;
use wifibench_transport::Transport;

pub const MCS_ATTEMPTS: u32 = 3;
pub const MCS_RETRY_DELAY: Duration = Duration::from_millis(200);
const MCS_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Queries the DUT's current MCS/rate information after a run.
///
/// The answer is auxiliary metadata: a failed query leaves the cell
/// `NULL` and never affects the throughput record.
#[derive(Debug, Clone)]
pub struct McsProbe {
    rx_command: Option<String>,
    tx_command: Option<String>,
    retry_delay: Duration,
}

impl McsProbe {
    pub fn new(config: &McsConfig) -> Self {
        Self {
            rx_command: config.rx_command.clone(),
            tx_command: config.tx_command.clone(),
            retry_delay: MCS_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn command(&self, direction: Direction) -> Option<&str> {
        match direction {
            Direction::Rx => self.rx_command.as_deref(),
            Direction::Tx => self.tx_command.as_deref(),
        }
    }

    /// Trimmed reply, or `None` when unconfigured, unanswered or blank.
    ///
    /// Only an unanswered query is retried; a blank answer is final.
    pub fn query(&self, transport: &mut dyn Transport, direction: Direction) -> Option<String> {
        let command = self.command(direction)?;
        for attempt in 1..=MCS_ATTEMPTS {
            match transport.execute(command, Some(MCS_COMMAND_TIMEOUT)) {
                Some(reply) => {
                    let text = reply.trim();
                    return (!text.is_empty()).then(|| text.to_string());
                }
                None => {
                    tracing::debug!(%direction, attempt, command, "mcs query got no reply");
                    if attempt < MCS_ATTEMPTS {
                        thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        None
    }
}
