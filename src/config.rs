use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::errors::CmdprobeError;

const CONFIG_DIR_NAME: &str = "cmdprobe";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Runtime settings, loadable from `<config dir>/cmdprobe/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Wrap the command in the platform accounting utility where one exists.
    pub use_accounting_utility: bool,
    pub accounting_utility_path: PathBuf,
    /// Pause between samples. `None` polls as fast as the queries allow.
    pub sampling_interval_ms: Option<u64>,
    /// Pause between polls while waiting for the wrapper to spawn the target.
    pub resolve_poll_interval_us: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_accounting_utility: true,
            accounting_utility_path: PathBuf::from("/usr/bin/time"),
            sampling_interval_ms: None,
            resolve_poll_interval_us: 500,
            log_level: "warn".to_string(),
        }
    }
}

impl Settings {
    /// Default config file location, if the platform has a config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Loads the default config file, falling back to defaults when it does not exist.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default()),
        }
    }

    /// Loads `path`. A missing file yields defaults; unreadable or malformed files are errors.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| CmdprobeError::ConfigReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = toml::from_str(&text).map_err(|e| CmdprobeError::ConfigParseError {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Ok(settings)
    }

    pub fn sampling_interval(&self) -> Option<Duration> {
        self.sampling_interval_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    pub fn resolve_poll_interval(&self) -> Duration {
        Duration::from_micros(self.resolve_poll_interval_us)
    }
}
