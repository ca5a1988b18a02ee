//! # Clock Module
//!
//! Time keeping for the control core:
//!
//! - [`timebase`]: RTC counter to seconds, wall clock
//! - [`timer`]: soft timer pool with one-second resolution
//! - [`alarm`]: time-of-day power alarms

pub mod alarm;
pub mod timebase;
pub mod timer;

pub use alarm::{AlarmClock, AlarmId, AlarmTime, ALL_ALARMS, NUM_ALARMS};
pub use timebase::TimeBase;
pub use timer::{TimerHandle, TimerPool};
