//! Static expected-throughput table.
//!
//! Rows and link descriptors go through the same normalisation, so
//! `802.11ax`, `11ax` and an empty mode all match an `11AX` row.

use wifibench_common::config::ExpectedRate;
use wifibench_common::{Direction, LinkDescriptor};

use crate::error::HarnessError;

/// Upper-case and drop the `802.11` prefix. Empty means `11AX`.
pub fn normalize_mode(mode: &str) -> String {
    let mode = mode.trim();
    if mode.is_empty() {
        return "11AX".into();
    }
    mode.to_uppercase().replace("802.11", "")
}

/// Bucket to `160MHZ`/`80MHZ`/`40MHZ`/`20MHZ`. Empty means `80MHZ`.
pub fn normalize_bandwidth(bandwidth: &str) -> String {
    let bw: String = bandwidth
        .to_uppercase()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    if bw.is_empty() {
        return "80MHZ".into();
    }
    for bucket in ["160", "80", "40", "20"] {
        if bw.contains(bucket) {
            return format!("{bucket}MHZ");
        }
    }
    bw
}

/// `WPA3`, `WPA2` or the upper-cased input. Empty means `WPA2`.
pub fn normalize_security(security: &str) -> String {
    let auth = security.trim().to_uppercase().replace('_', "-");
    if auth.is_empty() {
        return "WPA2".into();
    }
    if auth.contains("WPA3") {
        "WPA3".into()
    } else if auth.contains("WPA2") {
        "WPA2".into()
    } else {
        auth
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Key {
    band: String,
    mode: String,
    bandwidth: String,
    security: String,
}

impl Key {
    fn new(band: &str, mode: &str, bandwidth: &str, security: &str) -> Self {
        Self {
            band: band.trim().to_uppercase(),
            mode: normalize_mode(mode),
            bandwidth: normalize_bandwidth(bandwidth),
            security: normalize_security(security),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExpectedRateTable {
    rows: Vec<(Key, ExpectedRate)>,
}

impl ExpectedRateTable {
    pub fn new(rows: &[ExpectedRate]) -> Self {
        Self {
            rows: rows
                .iter()
                .map(|r| (Key::new(&r.band, &r.mode, &r.bandwidth, &r.security), r.clone()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Reference rate in Mbps for `link` in `direction`.
    pub fn lookup(&self, link: &LinkDescriptor, direction: Direction) -> Result<f64, HarnessError> {
        if link.band.trim().is_empty() {
            return Err(HarnessError::MalformedLink);
        }
        let key = Key::new(
            &link.band,
            &link.wireless_mode,
            &link.bandwidth,
            &link.security_mode,
        );
        let row = self
            .rows
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, row)| row)
            .ok_or_else(|| HarnessError::MissingExpectedRate {
                band: key.band.clone(),
                mode: key.mode.clone(),
                bandwidth: key.bandwidth.clone(),
                security: key.security.clone(),
            })?;
        Ok(match direction {
            Direction::Rx => row.dl,
            Direction::Tx => row.ul,
        })
    }
}
