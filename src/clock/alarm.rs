//! # Alarm Clock
//!
//! Fixed table of time-of-day alarms. Five ON and five OFF alarms exist per
//! power output; each one is identified by an [`AlarmId`] and fires at most
//! once per matching minute.
//!
//! ## Table order
//!
//! ```text
//! UA1 on 1..5, UA2 on 1..5, BATT on 1..5, UA1 off 1..5, UA2 off 1..5, BATT off 1..5
//! ```

use chrono::{NaiveTime, Timelike};
use heapless::Vec;
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::control::rail::{Rail, Switch, NUM_RAILS};

/// Alarms per rail and direction
pub const ALARMS_PER_SWITCH: usize = 5;

/// Total number of alarms
pub const NUM_ALARMS: usize = NUM_RAILS * 2 * ALARMS_PER_SWITCH;

/// Identifier of a power alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlarmId {
    Ua1On1,
    Ua1On2,
    Ua1On3,
    Ua1On4,
    Ua1On5,
    Ua2On1,
    Ua2On2,
    Ua2On3,
    Ua2On4,
    Ua2On5,
    BattOn1,
    BattOn2,
    BattOn3,
    BattOn4,
    BattOn5,
    Ua1Off1,
    Ua1Off2,
    Ua1Off3,
    Ua1Off4,
    Ua1Off5,
    Ua2Off1,
    Ua2Off2,
    Ua2Off3,
    Ua2Off4,
    Ua2Off5,
    BattOff1,
    BattOff2,
    BattOff3,
    BattOff4,
    BattOff5,
}

use AlarmId::*;

/// All alarm ids in table order
pub const ALL_ALARMS: [AlarmId; NUM_ALARMS] = [
    Ua1On1, Ua1On2, Ua1On3, Ua1On4, Ua1On5, Ua2On1, Ua2On2, Ua2On3, Ua2On4, Ua2On5, BattOn1, BattOn2, BattOn3,
    BattOn4, BattOn5, Ua1Off1, Ua1Off2, Ua1Off3, Ua1Off4, Ua1Off5, Ua2Off1, Ua2Off2, Ua2Off3, Ua2Off4,
    Ua2Off5, BattOff1, BattOff2, BattOff3, BattOff4, BattOff5,
];

/// Rail and direction switched by each alarm, indexed by table position
const TARGETS: [(Rail, Switch); NUM_ALARMS] = [
    (Rail::Ua1, Switch::On),
    (Rail::Ua1, Switch::On),
    (Rail::Ua1, Switch::On),
    (Rail::Ua1, Switch::On),
    (Rail::Ua1, Switch::On),
    (Rail::Ua2, Switch::On),
    (Rail::Ua2, Switch::On),
    (Rail::Ua2, Switch::On),
    (Rail::Ua2, Switch::On),
    (Rail::Ua2, Switch::On),
    (Rail::Batt, Switch::On),
    (Rail::Batt, Switch::On),
    (Rail::Batt, Switch::On),
    (Rail::Batt, Switch::On),
    (Rail::Batt, Switch::On),
    (Rail::Ua1, Switch::Off),
    (Rail::Ua1, Switch::Off),
    (Rail::Ua1, Switch::Off),
    (Rail::Ua1, Switch::Off),
    (Rail::Ua1, Switch::Off),
    (Rail::Ua2, Switch::Off),
    (Rail::Ua2, Switch::Off),
    (Rail::Ua2, Switch::Off),
    (Rail::Ua2, Switch::Off),
    (Rail::Ua2, Switch::Off),
    (Rail::Batt, Switch::Off),
    (Rail::Batt, Switch::Off),
    (Rail::Batt, Switch::Off),
    (Rail::Batt, Switch::Off),
    (Rail::Batt, Switch::Off),
];

impl AlarmId {
    /// Table index of this alarm
    pub fn index(self) -> usize {
        self as usize
    }

    /// Rail and direction this alarm switches
    pub fn target(self) -> (Rail, Switch) {
        TARGETS[self.index()]
    }

    /// Looks up the `slot`-th alarm (0-based) of a rail and direction
    ///
    /// # Returns
    ///
    /// `None` if `slot >= ALARMS_PER_SWITCH`
    pub fn power(rail: Rail, switch: Switch, slot: usize) -> Option<AlarmId> {
        if slot >= ALARMS_PER_SWITCH {
            return None;
        }
        let direction = if switch.is_on() { 0 } else { 1 };
        let index = (direction * NUM_RAILS + rail.index()) * ALARMS_PER_SWITCH + slot;
        ALL_ALARMS.get(index).copied()
    }
}

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (rail, switch) = self.target();
        let dir = if switch.is_on() { "ON" } else { "OFF" };
        write!(f, "{}_{}_{}", rail, dir, self.index() % ALARMS_PER_SWITCH + 1)
    }
}

/// Time of day with minute resolution, written as `H:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct AlarmTime {
    pub hour: u8,
    pub minute: u8,
}

impl AlarmTime {
    /// Creates an alarm time
    ///
    /// # Returns
    ///
    /// `None` for an hour above 23 or a minute above 59
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        (hour < 24 && minute < 60).then_some(Self { hour, minute })
    }

    /// Shifts the time by one hour if daylight saving time is active
    ///
    /// Hour 23 wraps to 0.
    ///
    /// # Examples
    ///
    /// ```
    /// use tamdl::clock::alarm::AlarmTime;
    ///
    /// let t = AlarmTime::new(23, 30).unwrap();
    /// assert_eq!(t.with_dst(true), AlarmTime::new(0, 30).unwrap());
    /// assert_eq!(t.with_dst(false), t);
    /// ```
    #[must_use]
    pub fn with_dst(self, dst: bool) -> Self {
        if dst {
            Self {
                hour: (self.hour + 1) % 24,
                minute: self.minute,
            }
        } else {
            self
        }
    }
}

impl FromStr for AlarmTime {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (h, m) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{}', expected H:MM", s))?;

        if h.is_empty() || h.len() > 2 || m.len() != 2 {
            return Err(format!("invalid time '{}', expected H:MM", s));
        }

        let hour: u8 = h.parse().map_err(|_| format!("invalid hour in '{}'", s))?;
        let minute: u8 = m.parse().map_err(|_| format!("invalid minute in '{}'", s))?;
        Self::new(hour, minute).ok_or_else(|| format!("time '{}' out of range", s))
    }
}

impl TryFrom<String> for AlarmTime {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for AlarmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.hour, self.minute)
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry<A> {
    time: AlarmTime,
    enabled: bool,
    action: Option<A>,
    fired: bool,
}

impl<A> Default for Entry<A> {
    fn default() -> Self {
        Self {
            time: AlarmTime { hour: 0, minute: 0 },
            enabled: false,
            action: None,
            fired: false,
        }
    }
}

/// Table of all alarms with their action tags
#[derive(Debug, Clone)]
pub struct AlarmClock<A: Copy> {
    entries: [Entry<A>; NUM_ALARMS],
}

impl<A: Copy> Default for AlarmClock<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Copy> AlarmClock<A> {
    /// Creates a table with all alarms disabled at 0:00
    pub fn new() -> Self {
        Self {
            entries: std::array::from_fn(|_| Entry::default()),
        }
    }

    /// Registers the action reported when the alarm fires
    pub fn set_action(&mut self, id: AlarmId, action: A) {
        self.entries[id.index()].action = Some(action);
    }

    /// Sets the alarm time; the enabled flag is unchanged
    pub fn set(&mut self, id: AlarmId, time: AlarmTime) {
        let entry = &mut self.entries[id.index()];
        entry.time = time;
        entry.fired = false;
    }

    /// Alarm time
    #[must_use]
    pub fn get(&self, id: AlarmId) -> AlarmTime {
        self.entries[id.index()].time
    }

    /// Enables the alarm
    pub fn enable(&mut self, id: AlarmId) {
        self.entries[id.index()].enabled = true;
    }

    /// Disables the alarm
    pub fn disable(&mut self, id: AlarmId) {
        self.entries[id.index()].enabled = false;
    }

    /// Whether the alarm is enabled
    #[must_use]
    pub fn is_enabled(&self, id: AlarmId) -> bool {
        self.entries[id.index()].enabled
    }

    /// Disables all alarms
    pub fn disable_all(&mut self) {
        for entry in self.entries.iter_mut() {
            entry.enabled = false;
        }
    }

    /// Checks all alarms against the current time
    ///
    /// An enabled alarm with an action fires when hour and minute match, and
    /// fires only once while the minute lasts.
    ///
    /// # Returns
    ///
    /// Fired alarms with their actions, in table order
    pub fn check(&mut self, now: NaiveTime) -> Vec<(AlarmId, A), NUM_ALARMS> {
        let mut fired = Vec::new();
        for (id, entry) in ALL_ALARMS.iter().zip(self.entries.iter_mut()) {
            let matches = u32::from(entry.time.hour) == now.hour() && u32::from(entry.time.minute) == now.minute();
            if !matches {
                entry.fired = false;
                continue;
            }
            if entry.fired || !entry.enabled {
                continue;
            }
            if let Some(action) = entry.action {
                entry.fired = true;
                debug!("Alarm {} fired at {}", id, entry.time);
                // one slot per table entry
                let _ = fired.push((*id, action));
            }
        }
        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    // ==================== AlarmId Tests ====================

    #[test]
    fn test_target_table_matches_range_layout() {
        for (index, id) in ALL_ALARMS.iter().enumerate() {
            assert_eq!(id.index(), index);
            let rail = Rail::ALL[(index / ALARMS_PER_SWITCH) % NUM_RAILS];
            let switch = if index < NUM_RAILS * ALARMS_PER_SWITCH {
                Switch::On
            } else {
                Switch::Off
            };
            assert_eq!(id.target(), (rail, switch), "alarm {:?}", id);
        }
    }

    #[test]
    fn test_power_lookup() {
        assert_eq!(AlarmId::power(Rail::Ua1, Switch::On, 0), Some(Ua1On1));
        assert_eq!(AlarmId::power(Rail::Ua2, Switch::Off, 4), Some(Ua2Off5));
        assert_eq!(AlarmId::power(Rail::Batt, Switch::On, 2), Some(BattOn3));
        assert_eq!(AlarmId::power(Rail::Batt, Switch::Off, 5), None);

        for id in ALL_ALARMS {
            let (rail, switch) = id.target();
            let slot = id.index() % ALARMS_PER_SWITCH;
            assert_eq!(AlarmId::power(rail, switch, slot), Some(id));
        }
    }

    #[test]
    fn test_alarm_display() {
        assert_eq!(Ua1On1.to_string(), "UA1_ON_1");
        assert_eq!(BattOff5.to_string(), "BATT_OFF_5");
    }

    // ==================== AlarmTime Tests ====================

    #[test]
    fn test_parse_time() {
        assert_eq!("7:05".parse::<AlarmTime>(), Ok(AlarmTime { hour: 7, minute: 5 }));
        assert_eq!("23:59".parse::<AlarmTime>(), Ok(AlarmTime { hour: 23, minute: 59 }));
        assert_eq!(" 0:00 ".parse::<AlarmTime>(), Ok(AlarmTime { hour: 0, minute: 0 }));
    }

    #[test]
    fn test_parse_time_rejects_garbage() {
        for bad in ["", "7", "7:5", "24:00", "12:60", "123:00", "a:bc", "12-30"] {
            assert!(bad.parse::<AlarmTime>().is_err(), "accepted '{}'", bad);
        }
    }

    #[test]
    fn test_dst_shift() {
        let t = AlarmTime::new(6, 15).unwrap();
        assert_eq!(t.with_dst(true), AlarmTime::new(7, 15).unwrap());
        assert_eq!(AlarmTime::new(23, 0).unwrap().with_dst(true).hour, 0);
    }

    #[test]
    fn test_time_display() {
        assert_eq!(AlarmTime::new(7, 5).unwrap().to_string(), "7:05");
    }

    // ==================== AlarmClock Tests ====================

    fn clock() -> AlarmClock<AlarmId> {
        let mut clock = AlarmClock::new();
        for id in ALL_ALARMS {
            clock.set_action(id, id);
        }
        clock
    }

    #[test]
    fn test_disabled_alarm_never_fires() {
        let mut clock = clock();
        clock.set(Ua1On1, AlarmTime::new(8, 0).unwrap());
        assert!(clock.check(at(8, 0, 0)).is_empty());
    }

    #[test]
    fn test_fires_once_per_minute() {
        let mut clock = clock();
        clock.set(Ua1On1, AlarmTime::new(8, 0).unwrap());
        clock.enable(Ua1On1);

        assert!(clock.check(at(7, 59, 59)).is_empty());
        assert_eq!(clock.check(at(8, 0, 0)).as_slice(), &[(Ua1On1, Ua1On1)]);
        for s in 1..60 {
            assert!(clock.check(at(8, 0, s)).is_empty());
        }
        assert!(clock.check(at(8, 1, 0)).is_empty());
    }

    #[test]
    fn test_fires_again_next_day() {
        let mut clock = clock();
        clock.set(BattOff2, AlarmTime::new(8, 0).unwrap());
        clock.enable(BattOff2);

        assert_eq!(clock.check(at(8, 0, 0)).len(), 1);
        assert!(clock.check(at(8, 1, 0)).is_empty());
        assert_eq!(clock.check(at(8, 0, 0)).len(), 1);
    }

    #[test]
    fn test_late_check_within_minute_fires() {
        let mut clock = clock();
        clock.set(Ua2On1, AlarmTime::new(12, 30).unwrap());
        clock.enable(Ua2On1);
        assert_eq!(clock.check(at(12, 30, 42)).len(), 1);
    }

    #[test]
    fn test_simultaneous_alarms_in_table_order() {
        let mut clock = clock();
        let t = AlarmTime::new(6, 0).unwrap();
        for id in [BattOn1, Ua1Off3, Ua2On2] {
            clock.set(id, t);
            clock.enable(id);
        }
        let fired: std::vec::Vec<AlarmId> = clock.check(at(6, 0, 0)).iter().map(|(id, _)| *id).collect();
        assert_eq!(fired, vec![Ua2On2, BattOn1, Ua1Off3]);
    }

    #[test]
    fn test_alarm_without_action_is_silent() {
        let mut clock: AlarmClock<u8> = AlarmClock::new();
        clock.set(Ua1On1, AlarmTime::new(1, 0).unwrap());
        clock.enable(Ua1On1);
        assert!(clock.check(at(1, 0, 0)).is_empty());
    }

    #[test]
    fn test_enable_disable_get() {
        let mut clock = clock();
        let t = AlarmTime::new(9, 45).unwrap();
        clock.set(Ua2Off4, t);
        assert_eq!(clock.get(Ua2Off4), t);
        assert!(!clock.is_enabled(Ua2Off4));
        clock.enable(Ua2Off4);
        assert!(clock.is_enabled(Ua2Off4));
        clock.disable_all();
        assert!(!clock.is_enabled(Ua2Off4));
    }
}
