//! # Power Rails
//!
//! Static definition of the switchable power outputs, their power-cycle
//! configuration and the per-rail sequencing phase.

use serde::Deserialize;
use std::fmt;
use thiserror::Error;

use super::measure::Measure;

/// Number of switchable power outputs
pub const NUM_RAILS: usize = 3;

/// Minimum power-cycle interval in seconds
pub const MIN_INTERVAL: i32 = 10;

/// Minimum ON phase of a power cycle in seconds
pub const MIN_ON_DURATION: i32 = 5;

/// Minimum OFF phase of a power cycle in seconds
pub const MIN_OFF_DURATION: i32 = 5;

/// Sentinel for an interval/duration rejected by verification
pub const DUR_INVALID: i32 = -1;

/// Switchable power output
///
/// `Ua1` and `Ua2` are DC/DC outputs with voltage/current measurement,
/// `Batt` switches the battery voltage directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Rail {
    #[serde(rename = "UA1")]
    Ua1,
    #[serde(rename = "UA2")]
    Ua2,
    #[serde(rename = "BATT")]
    Batt,
}

impl Rail {
    /// All rails in table order
    pub const ALL: [Rail; NUM_RAILS] = [Rail::Ua1, Rail::Ua2, Rail::Batt];

    /// Table index of this rail
    pub const fn index(self) -> usize {
        match self {
            Rail::Ua1 => 0,
            Rail::Ua2 => 1,
            Rail::Batt => 2,
        }
    }

    /// Name as used in configuration files and log lines
    pub const fn name(self) -> &'static str {
        match self {
            Rail::Ua1 => "UA1",
            Rail::Ua2 => "UA2",
            Rail::Batt => "BATT",
        }
    }

    /// Measurement unit wired to this rail, if any
    pub const fn measure(self) -> Option<Measure> {
        match self {
            Rail::Ua1 => Some(Measure::Ua1),
            Rail::Ua2 => Some(Measure::Ua2),
            Rail::Batt => None,
        }
    }
}

impl fmt::Display for Rail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Switching direction of an alarm or cycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    /// `true` for [`Switch::On`]
    pub const fn is_on(self) -> bool {
        matches!(self, Switch::On)
    }
}

/// Sequencing phase of a rail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RailPhase {
    /// Switched off outside of an active window
    #[default]
    OffSteady,
    /// Switched on by an alarm, no power cycling
    OnSteady,
    /// Active window, currently in the ON phase of a power cycle
    CyclingOn,
    /// Active window, currently in the OFF phase of a power cycle
    CyclingOff,
}

/// Reason a power-cycle configuration was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CycleConfigError {
    #[error("_INTERVAL: Value {0}s is too small, minimum is {MIN_INTERVAL}s")]
    IntervalTooSmall(i32),

    #[error("_ON_DURATION: Value {0}s is too small, minimum is {MIN_ON_DURATION}s")]
    OnDurationTooSmall(i32),

    #[error("_ON_DURATION: Off duration of {0}s is too small, limit the On duration!")]
    OffDurationTooSmall(i32),
}

/// Power-cycle interval of a rail
///
/// Both values are in seconds. An interval of 0 disables cycling,
/// [`DUR_INVALID`] marks a configuration rejected by [`CycleConfig::verify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleConfig {
    pub interval: i32,
    pub on_duration: i32,
}

impl CycleConfig {
    /// Creates a cycle configuration without verifying it
    pub const fn new(interval: i32, on_duration: i32) -> Self {
        Self {
            interval,
            on_duration,
        }
    }

    /// Cycling switched off
    pub const fn disabled() -> Self {
        Self::new(0, 0)
    }

    /// Whether the cycle timer toggles the rail
    pub fn is_cycling(&self) -> bool {
        self.interval >= MIN_INTERVAL
    }

    /// Whether an ON alarm starts the cycle timer
    pub fn starts_on_alarm(&self) -> bool {
        self.on_duration >= MIN_ON_DURATION
    }

    /// Length of the OFF phase in seconds
    pub fn off_duration(&self) -> i32 {
        self.interval - self.on_duration
    }

    /// Checks the interval constraints
    ///
    /// `interval <= 0` is accepted as "cycling disabled". Otherwise
    /// `interval >= MIN_INTERVAL`, `on_duration >= MIN_ON_DURATION` and
    /// `interval - on_duration >= MIN_OFF_DURATION` must hold.
    pub fn check(&self) -> std::result::Result<(), CycleConfigError> {
        if self.interval <= 0 {
            return Ok(());
        }

        if self.interval < MIN_INTERVAL {
            Err(CycleConfigError::IntervalTooSmall(self.interval))
        } else if self.on_duration < MIN_ON_DURATION {
            Err(CycleConfigError::OnDurationTooSmall(self.on_duration))
        } else if self.off_duration() < MIN_OFF_DURATION {
            Err(CycleConfigError::OffDurationTooSmall(self.off_duration()))
        } else {
            Ok(())
        }
    }

    /// Checks the constraints and invalidates the configuration on failure
    pub fn verify(&mut self) -> std::result::Result<(), CycleConfigError> {
        let result = self.check();
        if result.is_err() {
            self.interval = DUR_INVALID;
            self.on_duration = DUR_INVALID;
        }
        result
    }

    /// Whether verification rejected this configuration
    pub fn is_invalid(&self) -> bool {
        self.interval == DUR_INVALID
    }
}
