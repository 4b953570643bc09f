//! Append-only CSV result log.
//!
//! One file per session, header written once at creation. Rows are only
//! ever appended; earlier rows are never touched. Profile and scenario
//! tags describe the session state and trail every row.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use wifibench_common::config::MAX_REPEAT;
use wifibench_common::{ConfigError, ResultRow};

use crate::error::HarnessError;

const FILE_STEM: &str = "Performance";
const UTF8_BOM: &str = "\u{feff}";

const LEADING_HEADERS: [&str; 14] = [
    "SerianNumber",
    "Test_Category",
    "Standard",
    "Freq_Band",
    "BW",
    "Data_Rate",
    "CH_Freq_MHz",
    "Protocol",
    "Direction",
    "Total_Path_Loss",
    "DB",
    "RSSI",
    "Angel",
    "MCS_Rate",
];

const TRAILING_HEADERS: [&str; 6] = [
    "Expect_Rate",
    "Latency",
    "Packet_Loss",
    "Profile_Mode",
    "Profile_Value",
    "Scenario_Group_Key",
];

// ── Formatting helpers ──────────────────────────────────────────────

/// Number of throughput cells per row.
pub fn throughput_width(repeat: u32) -> usize {
    repeat as usize + 1
}

/// `Throughput` for a single run, `Throughput 1..N` otherwise.
pub fn throughput_headers(repeat: u32) -> Vec<String> {
    let total = throughput_width(repeat);
    if total <= 1 {
        return vec!["Throughput".into()];
    }
    (1..=total).map(|i| format!("Throughput {i}")).collect()
}

pub fn header_row(repeat: u32) -> Vec<String> {
    LEADING_HEADERS
        .iter()
        .map(|h| h.to_string())
        .chain(throughput_headers(repeat))
        .chain(TRAILING_HEADERS.iter().map(|h| h.to_string()))
        .collect()
}

/// Record writer used for the header and every row: quotes only fields
/// holding a delimiter, quote or line break, `\n` terminated.
fn csv_writer<W: Write>(out: W) -> csv::Writer<W> {
    csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Necessary)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out)
}

/// Write one record and flush it to `out`.
fn write_record<W: Write, S: AsRef<[u8]>>(out: W, values: &[S]) -> io::Result<()> {
    let mut writer = csv_writer(out);
    writer.write_record(values)?;
    writer.flush()
}

/// Truncate or blank-pad to exactly `width` cells.
pub fn normalize_cells(mut entries: Vec<String>, width: usize) -> Vec<String> {
    let width = width.max(1);
    entries.truncate(width);
    entries.resize(width, String::new());
    entries
}

pub fn normalize_profile_mode(mode: &str) -> String {
    let text = mode.trim().to_lowercase();
    match text.as_str() {
        "" => String::new(),
        "target" | "target_rssi" | "rvo_target" => "TARGET_RSSI".into(),
        "static" | "static_db" | "rvo_static" => "STATIC_DB".into(),
        "default" | "normal" => "DEFAULT".into(),
        _ => text.to_uppercase(),
    }
}

/// Numbers are compacted (`10.0` → `10`, `2.50` → `2.5`); text passes through.
pub fn normalize_profile_value(value: &str) -> String {
    let text = value.trim();
    let Ok(number) = text.parse::<f64>() else {
        return text.to_string();
    };
    if !number.is_finite() {
        return text.to_string();
    }
    if number.fract() == 0.0 {
        return format!("{number:.0}");
    }
    let fixed = format!("{number:.2}");
    fixed.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Line breaks become spaces and commas become `_`.
pub fn normalize_scenario_key(key: &str) -> String {
    key.trim()
        .replace(['\r', '\n'], " ")
        .replace(',', "_")
        .trim()
        .to_string()
}

// ── Result log ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    repeat: u32,
    profile_mode: String,
    profile_value: String,
    scenario_key: String,
}

impl ResultLog {
    /// Create `Performance_<timestamp>.csv` under `dir`.
    pub fn create(dir: &Path, repeat: u32) -> Result<Self, HarnessError> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        Self::open(dir.join(format!("{FILE_STEM}_{stamp}.csv")), repeat)
    }

    /// Open `path` for appending, writing the header if the file is new or empty.
    pub fn open(path: PathBuf, repeat: u32) -> Result<Self, HarnessError> {
        if repeat > MAX_REPEAT {
            return Err(ConfigError::Invalid(format!(
                "result log repeat must be at most {MAX_REPEAT}, got {repeat}"
            ))
            .into());
        }
        let log = Self {
            path,
            repeat,
            profile_mode: String::new(),
            profile_value: String::new(),
            scenario_key: String::new(),
        };
        log.write_header().map_err(|source| log.sink_error(source))?;
        tracing::info!(path = %log.path.display(), repeat, "result log ready");
        Ok(log)
    }

    fn write_header(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        if file.metadata()?.len() == 0 {
            file.write_all(UTF8_BOM.as_bytes())?;
            write_record(&mut file, &header_row(self.repeat))?;
        }
        Ok(())
    }

    fn sink_error(&self, source: io::Error) -> HarnessError {
        HarnessError::Sink {
            path: self.path.display().to_string(),
            source,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    pub fn throughput_width(&self) -> usize {
        throughput_width(self.repeat)
    }

    pub fn headers(&self) -> Vec<String> {
        header_row(self.repeat)
    }

    /// Append one row followed by the active profile and scenario tags.
    pub fn append(&self, row: &ResultRow) -> Result<(), HarnessError> {
        let mut values = row.values();
        values.push(self.profile_mode.clone());
        values.push(self.profile_value.clone());
        values.push(self.scenario_key.clone());

        let result = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .and_then(|file| write_record(file, &values));
        result.map_err(|source| self.sink_error(source))?;
        tracing::info!(
            path = %self.path.display(),
            direction = row.direction.label(),
            protocol = %row.protocol,
            "result row written"
        );
        Ok(())
    }

    /// Tag subsequent rows. A value without a mode is tagged `CUSTOM`.
    pub fn set_active_profile(&mut self, mode: Option<&str>, value: Option<&str>) {
        let mut mode = mode.map(normalize_profile_mode).unwrap_or_default();
        let value = value.map(normalize_profile_value).unwrap_or_default();
        if mode.is_empty() && !value.is_empty() {
            mode = "CUSTOM".into();
        }
        self.profile_mode = mode;
        self.profile_value = value;
    }

    pub fn clear_active_profile(&mut self) {
        self.profile_mode.clear();
        self.profile_value.clear();
    }

    pub fn active_profile(&self) -> (&str, &str) {
        (&self.profile_mode, &self.profile_value)
    }

    pub fn set_scenario_group_key(&mut self, key: Option<&str>) {
        self.scenario_key = key.map(normalize_scenario_key).unwrap_or_default();
    }

    pub fn clear_scenario_group_key(&mut self) {
        self.scenario_key.clear();
    }

    pub fn scenario_group_key(&self) -> &str {
        &self.scenario_key
    }

    /// Rename the log so its file name starts with `test_type` upper-cased.
    ///
    /// `Performance_x.csv` becomes `RVR_x.csv`; any other name gets the
    /// prefix and an underscore. Rename failures are logged and ignored.
    pub fn ensure_prefix(&mut self, test_type: &str) {
        let prefix = test_type.trim().to_uppercase();
        if prefix.is_empty() {
            return;
        }
        let Some(name) = self.path.file_name().and_then(|n| n.to_str()) else {
            return;
        };
        if name.to_uppercase().starts_with(&prefix) {
            return;
        }
        let renamed = match name.strip_prefix(FILE_STEM) {
            Some(rest) => format!("{prefix}{rest}"),
            None => format!("{prefix}_{name}"),
        };
        let target = self.path.with_file_name(renamed);
        match fs::rename(&self.path, &target) {
            Ok(()) => {
                tracing::info!(from = %self.path.display(), to = %target.display(), "result log renamed");
                self.path = target;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    from = %self.path.display(),
                    to = %target.display(),
                    error = %e,
                    "failed to rename result log"
                );
            }
        }
    }
}
