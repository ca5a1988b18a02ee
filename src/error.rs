//! # Error Types
//!
//! Custom error types for the TAMDL control core using `thiserror`.

use thiserror::Error;

use crate::control::rail::Rail;

/// Main error type for the TAMDL control core
#[derive(Debug, Error)]
pub enum TamdlError {
    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file parsed but holds unusable values
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// RFID UART errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// More soft timers requested than the pool can hold
    #[error("Soft timer pool exhausted (capacity {capacity})")]
    TimerPoolExhausted { capacity: usize },

    /// Calibration with a zero reference value
    #[error("Calibration reference value must not be zero")]
    ZeroCalibrationReference,

    /// Calibration would produce a zero divisor
    #[error("Calibration raw value {raw} is too small for reference {reference}")]
    CalibrationOutOfRange { raw: u32, reference: u32 },

    /// Voltage/current requested for a rail without measurement unit
    #[error("Power output {0} has no measurement unit")]
    NoMeasurement(Rail),

    /// Event log record could not be serialized
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the TAMDL control core
pub type Result<T> = std::result::Result<T, TamdlError>;
