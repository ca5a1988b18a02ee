//! # Power Control Module
//!
//! Power outputs, measurement and calibration of the data logger.
//!
//! This module handles:
//! - Static rail and measurement unit definitions
//! - Power-cycle configuration and its verification
//! - Alarm/interval driven switching with follow-up measurement
//! - ADC raw value conversion and the calibration block

pub mod rail;
pub mod measure;
pub mod calibration;
pub mod sequencer;

pub use rail::{Rail, Switch};
pub use sequencer::PowerSequencer;
