//! # Measurement Units
//!
//! Voltage/current measurement of the DC/DC outputs. Each unit owns two
//! ADC channels (U and I); the ADC scans all channels of the active units.
//!
//! ## Channel assignment
//!
//! | Unit | Voltage | Current |
//! |------|---------|---------|
//! | UA1  | ch 6    | ch 0    |
//! | UA2  | ch 7    | ch 3    |

use super::rail::Rail;

/// Number of measurement units
pub const NUM_MEASURE: usize = 2;

/// Number of ADC input channels on the converter
pub const NUM_ADC_CHANNELS: usize = 8;

/// Default follow-up time after power-off in seconds
pub const DEFAULT_FOLLOW_UP_TIME: u32 = 60;

/// Default minimum voltage change to log in mV
pub const DEFAULT_U_MIN_DIFF: u32 = 100;

/// Default minimum current change to log in mA
pub const DEFAULT_I_MIN_DIFF: u32 = 10;

/// Default ADC scan duration in milliseconds
pub const DEFAULT_SCAN_DURATION_MS: u32 = 1000;

/// Lower bound of the ADC scan duration in milliseconds
pub const MIN_SCAN_DURATION_MS: u32 = 52;

/// Upper bound of the ADC scan duration in milliseconds
pub const MAX_SCAN_DURATION_MS: u32 = 2200;

/// Voltage/current measurement unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Measure {
    Ua1,
    Ua2,
}

impl Measure {
    /// All measurement units in table order
    pub const ALL: [Measure; NUM_MEASURE] = [Measure::Ua1, Measure::Ua2];

    /// Table index of this unit
    pub const fn index(self) -> usize {
        match self {
            Measure::Ua1 => 0,
            Measure::Ua2 => 1,
        }
    }

    /// Rail this unit measures
    pub const fn rail(self) -> Rail {
        match self {
            Measure::Ua1 => Rail::Ua1,
            Measure::Ua2 => Rail::Ua2,
        }
    }

    /// ADC channel of the voltage input
    pub const fn voltage_channel(self) -> u8 {
        match self {
            Measure::Ua1 => 6,
            Measure::Ua2 => 7,
        }
    }

    /// ADC channel of the current input
    pub const fn current_channel(self) -> u8 {
        match self {
            Measure::Ua1 => 0,
            Measure::Ua2 => 3,
        }
    }

    /// Bit mask of both channels of this unit
    pub const fn channel_mask(self) -> u8 {
        (1 << self.voltage_channel()) | (1 << self.current_channel())
    }
}

/// Logging thresholds of a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Minimum voltage change in mV
    pub u_min_diff: u32,
    /// Minimum current change in mA
    pub i_min_diff: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            u_min_diff: DEFAULT_U_MIN_DIFF,
            i_min_diff: DEFAULT_I_MIN_DIFF,
        }
    }
}

/// Known voltage and current applied while calibrating a unit, 0 = not set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CalibrationReference {
    pub mv: u32,
    pub ma: u32,
}

/// Last logged value pair of a measurement
///
/// A new pair is only logged when voltage or current moved by at least
/// the configured threshold since the value was last taken over. Voltage and
/// current are taken over independently, so a slow drift of one of them is
/// still caught once it adds up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoggedValue {
    mv: i64,
    ma: i64,
}

impl LoggedValue {
    /// Forgets the previous values so the next sample is compared against zero
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Last taken-over voltage in mV
    #[must_use]
    pub fn mv(&self) -> i64 {
        self.mv
    }

    /// Last taken-over current in mA
    #[must_use]
    pub fn ma(&self) -> i64 {
        self.ma
    }

    /// Takes over every component that moved by at least its threshold
    ///
    /// # Returns
    ///
    /// `true` if any component was taken over and the sample should be logged
    pub fn update(&mut self, mv: i64, ma: i64, thresholds: &Thresholds) -> bool {
        let mut changed = false;

        if (mv - self.mv).abs() >= i64::from(thresholds.u_min_diff) {
            self.mv = mv;
            changed = true;
        }
        if (ma - self.ma).abs() >= i64::from(thresholds.i_min_diff) {
            self.ma = ma;
            changed = true;
        }

        changed
    }
}

/// ADC channel bookkeeping
///
/// Tracks which channels are scanned and holds the latest raw sample of
/// every channel.
#[derive(Debug, Clone, Default)]
pub struct AdcChannels {
    active_mask: u8,
    samples: [u32; NUM_ADC_CHANNELS],
}

impl AdcChannels {
    /// Adds the channels of a unit to the scan set
    pub fn activate(&mut self, measure: Measure) {
        self.active_mask |= measure.channel_mask();
    }

    /// Removes the channels of a unit from the scan set
    ///
    /// # Returns
    ///
    /// `true` if no channel remains active
    pub fn deactivate(&mut self, measure: Measure) -> bool {
        self.active_mask &= !measure.channel_mask();
        self.active_mask == 0
    }

    /// Whether both channels of the unit are scanned
    #[must_use]
    pub fn is_active(&self, measure: Measure) -> bool {
        self.active_mask & measure.channel_mask() == measure.channel_mask()
    }

    /// Bit mask of all scanned channels
    #[must_use]
    pub fn mask(&self) -> u8 {
        self.active_mask
    }

    /// Stores a raw sample; out-of-range channels are ignored
    pub fn store(&mut self, channel: u8, raw: u32) {
        if let Some(slot) = self.samples.get_mut(usize::from(channel)) {
            *slot = raw;
        }
    }

    /// Latest raw sample of a channel
    #[must_use]
    pub fn sample(&self, channel: u8) -> u32 {
        self.samples
            .get(usize::from(channel))
            .copied()
            .unwrap_or_default()
    }

    /// Latest raw voltage sample of a unit
    #[must_use]
    pub fn raw_voltage(&self, measure: Measure) -> u32 {
        self.sample(measure.voltage_channel())
    }

    /// Latest raw current sample of a unit
    #[must_use]
    pub fn raw_current(&self, measure: Measure) -> u32 {
        self.sample(measure.current_channel())
    }
}

/// Clamps the ADC scan duration to the supported range
///
/// # Returns
///
/// The clamped value and whether clamping was necessary
#[must_use]
pub fn clamp_scan_duration(ms: u32) -> (u32, bool) {
    let clamped = ms.clamp(MIN_SCAN_DURATION_MS, MAX_SCAN_DURATION_MS);
    (clamped, clamped != ms)
}
