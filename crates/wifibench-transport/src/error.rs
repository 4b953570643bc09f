use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("empty command")]
    EmptyCommand,
    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("telnet endpoint {target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
