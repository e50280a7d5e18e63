//! Controller configuration.
//!
//! Defaults match the car's wiring harness. A JSON file may override any
//! subset of fields; missing fields keep their default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DaqError, DaqResult};

/// BCM pin numbers for the three monitored inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pins {
    pub shutdown: u32,
    pub logging: u32,
    pub brake: u32,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            shutdown: 23,
            logging: 24,
            brake: 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding RECORD_NNNN.csv session logs
    pub log_dir: PathBuf,
    pub file_prefix: String,
    pub file_extension: String,
    /// Highest session number probed before giving up
    pub max_file_number: u16,

    /// Target loop period (0 = run as fast as the sensors allow)
    pub loop_period_ms: u64,
    /// How long the session number stays on the display after open/close
    pub display_lock_ms: u64,
    /// Press length needed on the shutdown button (0 disables it)
    pub shutdown_hold_ms: u64,
    /// Glitch filter applied to every input line
    pub debounce_us: u64,

    pub cvt_warn_temp_f: f32,
    pub low_battery_voltage: f32,

    pub pins: Pins,
    /// Command the process is replaced with on a long shutdown press
    pub shutdown_command: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("/home/pi/DAQ"),
            file_prefix: "RECORD_".to_string(),
            file_extension: "csv".to_string(),
            max_file_number: 9999,
            loop_period_ms: 0,
            display_lock_ms: 1500,
            shutdown_hold_ms: 250,
            debounce_us: 20_000,
            cvt_warn_temp_f: 200.0,
            low_battery_voltage: 11.1,
            pins: Pins::default(),
            shutdown_command: vec![
                "/usr/bin/sudo".to_string(),
                "shutdown".to_string(),
                "now".to_string(),
            ],
        }
    }
}

impl Config {
    /// Load from a JSON file, or use defaults when no path is given
    pub fn load(path: Option<&Path>) -> DaqResult<Self> {
        let config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|e| {
                    DaqError::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&text)?
            }
            None => Config::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> DaqResult<()> {
        if self.max_file_number > 9999 {
            return Err(DaqError::Config(format!(
                "max_file_number {} does not fit the 4-digit file name",
                self.max_file_number
            )));
        }
        if self.shutdown_command.is_empty() {
            return Err(DaqError::Config("shutdown_command is empty".to_string()));
        }
        if self.file_prefix.contains(std::path::MAIN_SEPARATOR) {
            return Err(DaqError::Config(format!(
                "file_prefix {:?} must not contain a path separator",
                self.file_prefix
            )));
        }
        Ok(())
    }

    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(self.loop_period_ms)
    }

    pub fn display_lock(&self) -> Duration {
        Duration::from_millis(self.display_lock_ms)
    }

    pub fn shutdown_hold(&self) -> Duration {
        Duration::from_millis(self.shutdown_hold_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_micros(self.debounce_us)
    }
}
