//! # Time Base
//!
//! Turns the free-running 32.768 kHz RTC counter into whole-second ticks and
//! keeps the wall clock the alarms are checked against.

use chrono::{Duration, NaiveDateTime, NaiveTime};

/// RTC counter frequency in Hz
pub const RTC_FREQUENCY_HZ: u32 = 32_768;

/// Width of the hardware RTC counter in bits
pub const RTC_COUNTER_BITS: u32 = 24;

/// Wall clock driven by RTC counter readings or explicit second ticks
#[derive(Debug, Clone)]
pub struct TimeBase {
    now: NaiveDateTime,
    frequency: u32,
    mask: u32,
    last_count: Option<u32>,
    residual: u64,
    uptime: u64,
}

impl TimeBase {
    /// Creates a time base for the 24-bit 32.768 kHz RTC
    pub fn new(start: NaiveDateTime) -> Self {
        Self::with_counter(start, RTC_FREQUENCY_HZ, RTC_COUNTER_BITS)
    }

    /// Creates a time base for a counter of the given frequency and width
    pub fn with_counter(start: NaiveDateTime, frequency: u32, bits: u32) -> Self {
        let mask = if bits >= 32 { u32::MAX } else { (1u32 << bits) - 1 };
        Self {
            now: start,
            frequency: frequency.max(1),
            mask,
            last_count: None,
            residual: 0,
            uptime: 0,
        }
    }

    /// Feeds a counter reading
    ///
    /// The first reading only establishes the reference. Counter wrap-around
    /// is handled as long as readings are less than one full counter period
    /// apart.
    ///
    /// # Returns
    ///
    /// Number of whole seconds elapsed since the previous reading. The clock
    /// is not advanced; call [`TimeBase::advance`] once per returned second.
    pub fn update(&mut self, count: u32) -> u32 {
        let count = count & self.mask;
        let Some(last) = self.last_count.replace(count) else {
            return 0;
        };

        let delta = count.wrapping_sub(last) & self.mask;
        self.residual += u64::from(delta);
        let secs = self.residual / u64::from(self.frequency);
        self.residual %= u64::from(self.frequency);
        secs as u32
    }

    /// Advances the clock by one second
    pub fn advance(&mut self) -> NaiveDateTime {
        self.now += Duration::seconds(1);
        self.uptime += 1;
        self.now
    }

    /// Sets the wall clock, e.g. after a time-signal sync
    pub fn set(&mut self, now: NaiveDateTime) {
        self.now = now;
    }

    /// Current date and time
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    /// Current time of day
    #[must_use]
    pub fn time_of_day(&self) -> NaiveTime {
        self.now.time()
    }

    /// Seconds advanced since creation
    #[must_use]
    pub fn uptime(&self) -> u64 {
        self.uptime
    }
}
