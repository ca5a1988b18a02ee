//! # TAMDL Library
//!
//! Event/timer-driven control core of the TAMDL field data logger.
//!
//! This library provides the soft timer pool and alarm clock, the power
//! sequencer with measurement control and calibration, and the RFID
//! transponder decoder. [`system::Tamdl`] wires them together.

pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod hal;
pub mod rfid;
pub mod serial;
pub mod system;
pub mod telemetry;
