use std::io;

use thiserror::Error;
use wifibench_common::ConfigError;

/// Setup problems that must reach the caller.
///
/// Flaky runs never show up here; they degrade to blank cells instead.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("link descriptor has no band")]
    MalformedLink,
    #[error("no expected rate for band={band} mode={mode} bandwidth={bandwidth} security={security}")]
    MissingExpectedRate {
        band: String,
        mode: String,
        bandwidth: String,
        security: String,
    },
    #[error("result log {path}: {source}")]
    Sink {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}
