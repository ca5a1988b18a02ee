//! # Calibration Module
//!
//! Converts raw ADC samples into millivolts and milliamperes using
//! per-unit fixed-point divisors, and serializes those divisors into the
//! non-volatile calibration block.
//!
//! ## Fixed-point format
//!
//! Divisors are Q16 values: `value = (raw << 16) / divisor`. A divisor of
//! `1 << 16` is the identity mapping used when no calibration is stored.
//!
//! ## Storage block
//!
//! Ten little-endian 16-bit words:
//!
//! ```text
//! [magic, ua1_mv_hi, ua1_mv_lo, ua1_ma_hi, ua1_ma_lo,
//!         ua2_mv_hi, ua2_mv_lo, ua2_ma_hi, ua2_ma_lo, checksum]
//! ```
//!
//! The checksum is the wrapping 16-bit sum of the first nine words.
//!
//! ## Usage
//!
//! ```
//! use tamdl::control::calibration::{Divisors, to_millis};
//! use tamdl::control::measure::Measure;
//!
//! let mut div = Divisors::default();
//! let divisor = div.calibrate_voltage(Measure::Ua1, 31_234, 5_000).unwrap();
//! assert_eq!(to_millis(31_234, divisor), 5_000);
//! ```

use crate::error::{Result, TamdlError};

use super::measure::{Measure, NUM_MEASURE};

/// Identity divisor (1.0 in Q16)
pub const UNITY_DIVISOR: u32 = 1 << 16;

/// Marker word of a valid calibration block
pub const CALIBRATION_MAGIC: u16 = 0x0815;

/// Number of 16-bit words in the calibration block
pub const BLOCK_WORDS: usize = 10;

/// Size of the calibration block in bytes
pub const BLOCK_SIZE: usize = BLOCK_WORDS * 2;

/// Converts a raw sample into a physical value
///
/// # Arguments
///
/// * `raw` - Raw ADC sample
/// * `divisor` - Q16 divisor, must not be zero
///
/// # Returns
///
/// Value in mV or mA; 0 for a zero divisor
#[must_use]
pub fn to_millis(raw: u32, divisor: u32) -> u32 {
    if divisor == 0 {
        return 0;
    }
    ((u64::from(raw) << 16) / u64::from(divisor)) as u32
}

/// Converts a physical value back into the raw ADC domain
///
/// # Examples
///
/// ```
/// use tamdl::control::calibration::{to_raw, UNITY_DIVISOR};
///
/// assert_eq!(to_raw(12_000, UNITY_DIVISOR), 12_000);
/// assert_eq!(to_raw(12_000, UNITY_DIVISOR / 2), 6_000);
/// ```
#[must_use]
pub fn to_raw(millis: u32, divisor: u32) -> u32 {
    ((u64::from(millis) * u64::from(divisor)) >> 16) as u32
}

/// Computes the divisor mapping `raw` onto `reference`
///
/// # Errors
///
/// Returns [`TamdlError::ZeroCalibrationReference`] for a zero reference and
/// [`TamdlError::CalibrationOutOfRange`] if the result does not fit a
/// non-zero 32-bit divisor.
pub fn divisor_for(raw: u32, reference: u32) -> Result<u32> {
    if reference == 0 {
        return Err(TamdlError::ZeroCalibrationReference);
    }

    let divisor = (u64::from(raw) << 16) / u64::from(reference);
    match u32::try_from(divisor) {
        Ok(d) if d > 0 => Ok(d),
        _ => Err(TamdlError::CalibrationOutOfRange { raw, reference }),
    }
}

/// Voltage and current divisors of all measurement units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divisors {
    mv: [u32; NUM_MEASURE],
    ma: [u32; NUM_MEASURE],
}

impl Default for Divisors {
    fn default() -> Self {
        Self {
            mv: [UNITY_DIVISOR; NUM_MEASURE],
            ma: [UNITY_DIVISOR; NUM_MEASURE],
        }
    }
}

impl Divisors {
    /// Voltage divisor of a unit
    #[must_use]
    pub fn voltage(&self, measure: Measure) -> u32 {
        self.mv[measure.index()]
    }

    /// Current divisor of a unit
    #[must_use]
    pub fn current(&self, measure: Measure) -> u32 {
        self.ma[measure.index()]
    }

    /// Recomputes the voltage divisor from a reference measurement
    ///
    /// # Arguments
    ///
    /// * `measure` - Unit to calibrate
    /// * `raw` - Raw sample taken while `reference_mv` was applied
    /// * `reference_mv` - Known voltage in mV
    ///
    /// # Errors
    ///
    /// See [`divisor_for`]. The stored divisor is unchanged on error.
    pub fn calibrate_voltage(&mut self, measure: Measure, raw: u32, reference_mv: u32) -> Result<u32> {
        let divisor = divisor_for(raw, reference_mv)?;
        self.mv[measure.index()] = divisor;
        Ok(divisor)
    }

    /// Recomputes the current divisor from a reference measurement
    ///
    /// # Errors
    ///
    /// See [`divisor_for`]. The stored divisor is unchanged on error.
    pub fn calibrate_current(&mut self, measure: Measure, raw: u32, reference_ma: u32) -> Result<u32> {
        let divisor = divisor_for(raw, reference_ma)?;
        self.ma[measure.index()] = divisor;
        Ok(divisor)
    }

    /// Serializes the divisors into a calibration block
    #[must_use]
    pub fn encode(&self) -> [u8; BLOCK_SIZE] {
        let mut words = [0u16; BLOCK_WORDS];
        words[0] = CALIBRATION_MAGIC;
        for m in Measure::ALL {
            let base = 1 + 4 * m.index();
            words[base] = (self.mv[m.index()] >> 16) as u16;
            words[base + 1] = self.mv[m.index()] as u16;
            words[base + 2] = (self.ma[m.index()] >> 16) as u16;
            words[base + 3] = self.ma[m.index()] as u16;
        }
        words[BLOCK_WORDS - 1] = checksum(&words[..BLOCK_WORDS - 1]);

        let mut block = [0u8; BLOCK_SIZE];
        for (chunk, word) in block.chunks_exact_mut(2).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        block
    }

    /// Parses a calibration block
    ///
    /// # Returns
    ///
    /// `None` if the block is short, has a wrong magic or checksum, or holds
    /// a zero divisor.
    #[must_use]
    pub fn decode(block: &[u8]) -> Option<Self> {
        if block.len() < BLOCK_SIZE {
            return None;
        }

        let mut words = [0u16; BLOCK_WORDS];
        for (word, chunk) in words.iter_mut().zip(block.chunks_exact(2)) {
            *word = u16::from_le_bytes([chunk[0], chunk[1]]);
        }

        if words[0] != CALIBRATION_MAGIC || words[BLOCK_WORDS - 1] != checksum(&words[..BLOCK_WORDS - 1]) {
            return None;
        }

        let mut div = Self::default();
        for m in Measure::ALL {
            let base = 1 + 4 * m.index();
            div.mv[m.index()] = (u32::from(words[base]) << 16) | u32::from(words[base + 1]);
            div.ma[m.index()] = (u32::from(words[base + 2]) << 16) | u32::from(words[base + 3]);
        }

        if div.mv.contains(&0) || div.ma.contains(&0) {
            return None;
        }
        Some(div)
    }
}

/// Wrapping 16-bit sum of all words
#[must_use]
pub fn checksum(words: &[u16]) -> u16 {
    words.iter().fold(0u16, |acc, w| acc.wrapping_add(*w))
}
