//! # Configuration Module
//!
//! Handles loading and validating configuration from TOML files.
//!
//! Structural errors (malformed times, too many alarms, unusable storage or
//! log settings) are rejected here. Power-cycle intervals and the ADC scan
//! duration are only checked later by the sequencer, which downgrades bad
//! values instead of refusing the file.

use serde::de::Error;
use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

use crate::clock::alarm::{AlarmTime, ALARMS_PER_SWITCH};
use crate::control::measure::{
    DEFAULT_FOLLOW_UP_TIME, DEFAULT_I_MIN_DIFF, DEFAULT_SCAN_DURATION_MS, DEFAULT_U_MIN_DIFF,
};
use crate::control::rail::Rail;
use crate::error::{Result, TamdlError};
use crate::rfid::protocol::RfidType;

/// Main configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub clock: ClockConfig,

    #[serde(default)]
    pub power: PowerConfig,

    #[serde(default)]
    pub rfid: RfidConfig,

    #[serde(default)]
    pub measure: MeasureConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// Clock configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClockConfig {
    /// Daylight saving time active; alarm times are shifted by one hour
    #[serde(default)]
    pub dst: bool,
}

/// Power output schedules
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PowerConfig {
    #[serde(default)]
    pub ua1: RailConfig,

    #[serde(default)]
    pub ua2: RailConfig,

    #[serde(default)]
    pub batt: RailConfig,
}

impl PowerConfig {
    /// Schedule of a rail
    pub fn rail(&self, rail: Rail) -> &RailConfig {
        match rail {
            Rail::Ua1 => &self.ua1,
            Rail::Ua2 => &self.ua2,
            Rail::Batt => &self.batt,
        }
    }
}

/// Schedule of one power output
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RailConfig {
    #[serde(default)]
    pub on_times: Vec<AlarmTime>,

    #[serde(default)]
    pub off_times: Vec<AlarmTime>,

    /// Power-cycle interval in seconds, 0 = no cycling
    #[serde(default)]
    pub interval: i32,

    /// ON phase of a power cycle in seconds
    #[serde(default)]
    pub on_duration: i32,
}

/// RFID reader configuration
#[derive(Debug, Deserialize, Clone)]
pub struct RfidConfig {
    /// Reader type, `"NONE"` disables the reader
    #[serde(default, rename = "type", deserialize_with = "none_or")]
    pub kind: Option<RfidType>,

    /// Power output feeding the reader, `"NONE"` disables the reader
    #[serde(default, deserialize_with = "none_or")]
    pub power: Option<Rail>,

    /// Seconds without a frame until a transponder counts as absent, 0 = off
    #[serde(default = "default_absent_detect_timeout")]
    pub absent_detect_timeout: u32,

    #[serde(default)]
    pub display_update_when_absent: bool,

    /// Host serial port of the reader
    #[serde(default)]
    pub port: String,
}

/// Measurement configuration
#[derive(Debug, Deserialize, Clone)]
pub struct MeasureConfig {
    /// ADC scan duration in milliseconds
    #[serde(default = "default_scan_duration")]
    pub scan_duration: u32,

    #[serde(default)]
    pub ua1: MeasureUnitConfig,

    #[serde(default)]
    pub ua2: MeasureUnitConfig,

    #[serde(default)]
    pub batt: MeasureUnitConfig,
}

impl MeasureConfig {
    /// Measurement settings of a rail
    pub fn rail(&self, rail: Rail) -> &MeasureUnitConfig {
        match rail {
            Rail::Ua1 => &self.ua1,
            Rail::Ua2 => &self.ua2,
            Rail::Batt => &self.batt,
        }
    }
}

/// Measurement settings of one output
#[derive(Debug, Deserialize, Clone)]
pub struct MeasureUnitConfig {
    /// Seconds to keep measuring after power-off
    #[serde(default = "default_follow_up_time")]
    pub follow_up_time: u32,

    /// Minimum voltage change to log in mV
    #[serde(default = "default_u_min_diff")]
    pub u_min_diff: u32,

    /// Minimum current change to log in mA
    #[serde(default = "default_i_min_diff")]
    pub i_min_diff: u32,

    /// Voltage reference for calibration in mV
    #[serde(default)]
    pub calibrate_mv: u32,

    /// Current reference for calibration in mA
    #[serde(default)]
    pub calibrate_ma: u32,
}

/// Event log configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Directory for JSONL event logs and diagnostic logs, empty = none
    #[serde(default)]
    pub dir: String,

    #[serde(default = "default_max_records_per_file")]
    pub max_records_per_file: usize,

    #[serde(default = "default_max_files_to_keep")]
    pub max_files_to_keep: usize,
}

/// Non-volatile storage configuration
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_calibration_file")]
    pub calibration_file: String,
}

// Default value functions
fn default_absent_detect_timeout() -> u32 { 5 }

fn default_scan_duration() -> u32 { DEFAULT_SCAN_DURATION_MS }
fn default_follow_up_time() -> u32 { DEFAULT_FOLLOW_UP_TIME }
fn default_u_min_diff() -> u32 { DEFAULT_U_MIN_DIFF }
fn default_i_min_diff() -> u32 { DEFAULT_I_MIN_DIFF }

fn default_max_records_per_file() -> usize { 10000 }
fn default_max_files_to_keep() -> usize { 10 }

fn default_calibration_file() -> String { "calibration.bin".to_string() }

impl Default for RfidConfig {
    fn default() -> Self {
        Self {
            kind: None,
            power: None,
            absent_detect_timeout: default_absent_detect_timeout(),
            display_update_when_absent: false,
            port: String::new(),
        }
    }
}

impl Default for MeasureConfig {
    fn default() -> Self {
        Self {
            scan_duration: default_scan_duration(),
            ua1: MeasureUnitConfig::default(),
            ua2: MeasureUnitConfig::default(),
            batt: MeasureUnitConfig::default(),
        }
    }
}

impl Default for MeasureUnitConfig {
    fn default() -> Self {
        Self {
            follow_up_time: default_follow_up_time(),
            u_min_diff: default_u_min_diff(),
            i_min_diff: default_i_min_diff(),
            calibrate_mv: 0,
            calibrate_ma: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: String::new(),
            max_records_per_file: default_max_records_per_file(),
            max_files_to_keep: default_max_files_to_keep(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            calibration_file: default_calibration_file(),
        }
    }
}

/// Accepts either a value of `T` or the string `"NONE"`
fn none_or<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NoneOr<V> {
        Value(V),
        Tag(String),
    }

    match NoneOr::<T>::deserialize(deserializer)? {
        NoneOr::Value(v) => Ok(Some(v)),
        NoneOr::Tag(s) if s == "NONE" => Ok(None),
        NoneOr::Tag(s) => Err(D::Error::custom(format!("unknown selection '{}'", s))),
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// * `Result<Config>` - Loaded and validated configuration
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - TOML parsing fails, including malformed alarm times
    /// - Validation fails
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tamdl::config::Config;
    ///
    /// let config = Config::load("config/tamdl.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate configuration from a TOML string
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`], without the I/O part
    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    ///
    /// # Returns
    ///
    /// * `Result<()>` - Ok if valid, Err if invalid
    ///
    /// # Errors
    ///
    /// Returns error if any configuration value is out of valid range
    fn validate(&self) -> Result<()> {
        // Validate alarm tables
        for rail in Rail::ALL {
            let schedule = self.power.rail(rail);
            for (what, times) in [("on_times", &schedule.on_times), ("off_times", &schedule.off_times)] {
                if times.len() > ALARMS_PER_SWITCH {
                    return Err(TamdlError::InvalidConfig(format!(
                        "power.{}.{} holds {} entries, at most {} are supported",
                        rail.name().to_lowercase(),
                        what,
                        times.len(),
                        ALARMS_PER_SWITCH
                    )));
                }
            }
        }

        // Validate storage
        if self.storage.calibration_file.is_empty() {
            return Err(TamdlError::InvalidConfig(
                "storage calibration_file cannot be empty".to_string(),
            ));
        }

        // Validate event log file limits
        if !self.logging.dir.is_empty() {
            if self.logging.max_records_per_file == 0 {
                return Err(TamdlError::InvalidConfig(
                    "max_records_per_file must be greater than 0".to_string(),
                ));
            }

            if self.logging.max_files_to_keep == 0 {
                return Err(TamdlError::InvalidConfig(
                    "max_files_to_keep must be greater than 0".to_string(),
                ));
            }
        }

        // A reader port without a reader is a leftover, not an error
        if self.rfid.kind.is_some() && self.rfid.power.is_none() {
            tracing::warn!("rfid.type is set but rfid.power is NONE, reader stays inactive");
        }

        Ok(())
    }
}
