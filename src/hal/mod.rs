//! # Hardware Abstraction
//!
//! Plain accessors the control core drives: output pins, the ADC scanner,
//! non-volatile storage for calibration data, and the battery gauge.
//! [`sim`] provides host implementations.

pub mod sim;

use crate::control::measure::NUM_MEASURE;
use crate::control::rail::NUM_RAILS;
use crate::error::Result;

/// Single-bit output
pub trait PinHandle: Send {
    /// Current output level
    fn get(&self) -> bool;

    /// Drives the output
    fn set(&mut self, on: bool);
}

/// ADC running a periodic scan over a channel set
pub trait AdcScanner: Send {
    /// Starts (or restarts) scanning the channels in `channel_mask`
    fn start_scan(&mut self, channel_mask: u8, scan_duration_ms: u32);

    /// Stops scanning
    fn stop_scan(&mut self);
}

/// Non-volatile block storage
pub trait NvStorage: Send {
    /// Reads the stored block into `buf`
    ///
    /// # Returns
    ///
    /// Number of bytes read; 0 if nothing is stored
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be accessed
    fn read_block(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Replaces the stored block
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    fn write_block(&mut self, data: &[u8]) -> Result<()>;
}

/// Battery controller readout
#[cfg_attr(test, mockall::automock)]
pub trait BatteryGauge: Send {
    /// Battery voltage in mV, `None` on a read error
    fn voltage_mv(&mut self) -> Option<i32>;

    /// Battery current in mA, `None` on a read error
    fn current_ma(&mut self) -> Option<i32>;
}

/// Hardware handed to the control core
pub struct Hardware {
    /// Rail enable pins in [`Rail`](crate::control::rail::Rail) table order
    pub rail_pins: [Box<dyn PinHandle>; NUM_RAILS],
    /// Measurement enable pins in [`Measure`](crate::control::measure::Measure) table order
    pub measure_pins: [Box<dyn PinHandle>; NUM_MEASURE],
    pub adc: Box<dyn AdcScanner>,
    pub storage: Box<dyn NvStorage>,
    pub battery: Option<Box<dyn BatteryGauge>>,
}
