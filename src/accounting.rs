use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use crate::errors::CmdprobeError;

const KEY_USER_TIME: &str = "User time (seconds)";
const KEY_SYSTEM_TIME: &str = "System time (seconds)";
const KEY_CPU_PERCENT: &str = "Percent of CPU this job got";
const KEY_WALL_CLOCK: &str = "Elapsed (wall clock) time (h:mm:ss or m:ss)";
const KEY_MAX_RSS: &str = "Maximum resident set size (kbytes)";
const KEY_FS_INPUTS: &str = "File system inputs";
const KEY_FS_OUTPUTS: &str = "File system outputs";
const KEY_EXIT_STATUS: &str = "Exit status";

/// File system inputs/outputs are counted in 512-byte blocks.
const FS_BLOCK_BYTES: u64 = 512;

/// A report value typed by attempted parse: integer, then float, then text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReportValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl ReportValue {
    pub fn from_text(s: &str) -> Self {
        if let Ok(i) = s.parse::<i64>() {
            ReportValue::Integer(i)
        } else if let Ok(f) = s.parse::<f64>() {
            ReportValue::Float(f)
        } else {
            ReportValue::Text(s.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReportValue::Integer(i) => Some(*i as f64),
            ReportValue::Float(f) => Some(*f),
            ReportValue::Text(_) => None,
        }
    }
}

/// The accounting utility's view of one run of the target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountingReport {
    pub user_time: f64,
    pub system_time: f64,
    pub cpu_percent: f64,
    /// Seconds.
    pub wall_clock_time: f64,
    pub max_resident_set_bytes: u64,
    pub file_system_inputs_bytes: u64,
    pub file_system_outputs_bytes: u64,
    pub exit_code: i32,
    /// Every `key: value` line of the report, typed.
    pub fields: BTreeMap<String, ReportValue>,
}

impl AccountingReport {
    /// Reads and parses a report written by `time -o <path> -v`.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CmdprobeError::ReportReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let fields = parse_report_fields(text)?;

        Ok(AccountingReport {
            user_time: number(&fields, KEY_USER_TIME)?,
            system_time: number(&fields, KEY_SYSTEM_TIME)?,
            cpu_percent: number(&fields, KEY_CPU_PERCENT)?,
            wall_clock_time: number(&fields, KEY_WALL_CLOCK)?,
            max_resident_set_bytes: number(&fields, KEY_MAX_RSS)? as u64 * 1024,
            file_system_inputs_bytes: number(&fields, KEY_FS_INPUTS)? as u64 * FS_BLOCK_BYTES,
            file_system_outputs_bytes: number(&fields, KEY_FS_OUTPUTS)? as u64 * FS_BLOCK_BYTES,
            exit_code: number(&fields, KEY_EXIT_STATUS)? as i32,
            fields,
        })
    }
}

fn number(fields: &BTreeMap<String, ReportValue>, key: &str) -> Result<f64> {
    let value = fields
        .get(key)
        .ok_or_else(|| CmdprobeError::ReportParseError {
            detail: format!("missing \"{}\"", key),
        })?;
    value.as_f64().ok_or_else(|| {
        CmdprobeError::ReportParseError {
            detail: format!("\"{}\" is not numeric: {:?}", key, value),
        }
        .into()
    })
}

/// Splits every `key: value` line on its last `": "`, coerces unmeasured `?`
/// values to `0`, converts the wall-clock duration to seconds and the CPU
/// percentage to a bare number, then types each value.
///
/// Lines without a `": "` separator (e.g. "Command exited with non-zero
/// status 3") are skipped.
pub fn parse_report_fields(text: &str) -> Result<BTreeMap<String, ReportValue>> {
    let mut fields = BTreeMap::new();

    for line in text.lines() {
        let line = line.trim();
        let Some((key, value)) = line.rsplit_once(": ") else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().replace('?', "0");

        let typed = match key {
            KEY_WALL_CLOCK => ReportValue::Float(parse_duration(&value)?),
            KEY_CPU_PERCENT => ReportValue::Float(parse_percent(&value)?),
            _ => ReportValue::from_text(&value),
        };
        fields.insert(key.to_string(), typed);
    }

    Ok(fields)
}

/// Converts `h:mm:ss.ss`, `m:ss.ss` or `ss.ss` to seconds.
///
/// The fractional part from the first `.` on is parsed separately; the rest is
/// split on `:` and read right to left as seconds, minutes, hours.
pub fn parse_duration(s: &str) -> Result<f64> {
    let invalid = || CmdprobeError::ReportParseError {
        detail: format!("invalid duration \"{}\"", s),
    };

    let (whole, fraction) = match s.find('.') {
        Some(dot) => {
            let fraction: f64 = format!("0{}", &s[dot..]).parse().map_err(|_| invalid())?;
            (&s[..dot], fraction)
        }
        None => (s, 0.0),
    };

    let mut secs = 0u64;
    for (position, token) in whole.rsplit(':').enumerate() {
        let token = token.trim();
        let value: u64 = if token.is_empty() {
            0
        } else {
            token.parse().map_err(|_| invalid())?
        };
        let scaled = u32::try_from(position)
            .ok()
            .and_then(|position| 60u64.checked_pow(position))
            .and_then(|unit| value.checked_mul(unit))
            .ok_or_else(invalid)?;
        secs = secs.checked_add(scaled).ok_or_else(invalid)?;
    }

    Ok(secs as f64 + fraction)
}

/// Strips the `%` suffix from a percentage such as `"178%"`.
pub fn parse_percent(s: &str) -> Result<f64> {
    let trimmed = s.trim().trim_end_matches('%');
    trimmed.parse().map_err(|_| {
        CmdprobeError::ReportParseError {
            detail: format!("invalid percentage \"{}\"", s),
        }
        .into()
    })
}
