//! # Power Sequencer
//!
//! Owns the power outputs and everything hanging off them: alarm- and
//! interval-driven switching, measurement follow-up, ADC scan control,
//! threshold-based measurement logging and calibration.
//!
//! Handlers for alarm and timer events return the switch they decided on
//! instead of touching the output, so the caller can route the output that
//! feeds the RFID reader through the reader's enable/disable logic.

use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::calibration::{to_millis, to_raw, Divisors, BLOCK_SIZE};
use super::measure::{
    clamp_scan_duration, AdcChannels, CalibrationReference, LoggedValue, Measure, Thresholds,
    DEFAULT_FOLLOW_UP_TIME,
    DEFAULT_SCAN_DURATION_MS, MAX_SCAN_DURATION_MS, NUM_MEASURE,
};
use super::rail::{CycleConfig, Rail, RailPhase, Switch, NUM_RAILS};
use crate::clock::timer::TimerHandle;
use crate::config::{Config, MeasureUnitConfig};
use crate::error::{Result, TamdlError};
use crate::events::{DisplayField, EventSink};
use crate::hal::Hardware;
use crate::system::{Event, Timers};

/// Channels covered by a running ADC scan
pub const ADC_SCAN_MASK: u8 = Measure::Ua1.channel_mask() | Measure::Ua2.channel_mask();

/// Minimum pause between two battery gauge readouts
pub const BATT_MEASURE_INTERVAL: Duration = Duration::from_millis(500);

/// Added to a voltage reading before it is compared and logged
const VOLTAGE_ROUNDING_MV: u32 = 50;

fn secs(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn thresholds(unit: &MeasureUnitConfig) -> Thresholds {
    Thresholds {
        u_min_diff: unit.u_min_diff,
        i_min_diff: unit.i_min_diff,
    }
}

/// Battery-input readout state
#[derive(Debug, Default)]
struct BatteryMonitor {
    /// BATT is on or in its follow-up time
    active: bool,
    /// A UA reading was logged; log the battery with the next readout
    pending: bool,
    /// Earliest next readout, `None` means immediately
    next_due: Option<Instant>,
    logged: LoggedValue,
    follow_up_time: u32,
    thresholds: Thresholds,
}

/// Power output sequencing and measurement
pub struct PowerSequencer {
    hw: Hardware,
    cycles: [CycleConfig; NUM_RAILS],
    phases: [RailPhase; NUM_RAILS],
    cycle_timers: [TimerHandle; NUM_RAILS],
    follow_up_timers: [TimerHandle; NUM_MEASURE],
    follow_up_time: [u32; NUM_MEASURE],
    thresholds: [Thresholds; NUM_MEASURE],
    references: [CalibrationReference; NUM_MEASURE],
    logged: [LoggedValue; NUM_MEASURE],
    channels: AdcChannels,
    scan_duration_ms: u32,
    adc_requested: bool,
    adc_running: bool,
    battery: BatteryMonitor,
    batt_follow_up_timer: TimerHandle,
    divisors: Divisors,
    power_fail: bool,
}

impl PowerSequencer {
    /// Creates the sequencer with all outputs off
    ///
    /// Allocates the cycle and follow-up timers and loads the calibration
    /// block. Missing or corrupt calibration data falls back to unity
    /// divisors.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer pool is exhausted
    pub fn new(mut hw: Hardware, timers: &mut Timers, sink: &mut dyn EventSink) -> Result<Self> {
        for pin in hw.rail_pins.iter_mut().chain(hw.measure_pins.iter_mut()) {
            pin.set(false);
        }

        let cycle_timers = [
            timers.create(Event::PowerCycle(Rail::Ua1))?,
            timers.create(Event::PowerCycle(Rail::Ua2))?,
            timers.create(Event::PowerCycle(Rail::Batt))?,
        ];
        let follow_up_timers = [
            timers.create(Event::MeasureStop(Measure::Ua1))?,
            timers.create(Event::MeasureStop(Measure::Ua2))?,
        ];
        let batt_follow_up_timer = timers.create(Event::BatteryMeasureStop)?;

        let mut sequencer = Self {
            hw,
            cycles: [CycleConfig::disabled(); NUM_RAILS],
            phases: [RailPhase::default(); NUM_RAILS],
            cycle_timers,
            follow_up_timers,
            follow_up_time: [DEFAULT_FOLLOW_UP_TIME; NUM_MEASURE],
            thresholds: [Thresholds::default(); NUM_MEASURE],
            references: [CalibrationReference::default(); NUM_MEASURE],
            logged: [LoggedValue::default(); NUM_MEASURE],
            channels: AdcChannels::default(),
            scan_duration_ms: DEFAULT_SCAN_DURATION_MS,
            adc_requested: false,
            adc_running: false,
            battery: BatteryMonitor {
                follow_up_time: DEFAULT_FOLLOW_UP_TIME,
                ..BatteryMonitor::default()
            },
            batt_follow_up_timer,
            divisors: Divisors::default(),
            power_fail: false,
        };
        sequencer.read_calibration(sink);
        Ok(sequencer)
    }

    fn read_calibration(&mut self, sink: &mut dyn EventSink) {
        sink.log("Reading Calibration Values from Flash");

        let mut block = [0u8; BLOCK_SIZE];
        let decoded = match self.hw.storage.read_block(&mut block) {
            Ok(n) => Divisors::decode(&block[..n]),
            Err(e) => {
                warn!("Calibration storage read failed: {}", e);
                None
            }
        };

        match decoded {
            Some(divisors) => self.divisors = divisors,
            None => {
                sink.log("Calibration Values: Wrong magic or checksum - using defaults");
                self.divisors = Divisors::default();
            }
        }
    }

    // ==================== Configuration ====================

    /// Resets intervals and measurement parameters to their defaults
    pub fn clear_configuration(&mut self) {
        self.cycles = [CycleConfig::disabled(); NUM_RAILS];
        self.scan_duration_ms = DEFAULT_SCAN_DURATION_MS;
        self.follow_up_time = [DEFAULT_FOLLOW_UP_TIME; NUM_MEASURE];
        self.thresholds = [Thresholds::default(); NUM_MEASURE];
        self.references = [CalibrationReference::default(); NUM_MEASURE];
        self.battery.follow_up_time = DEFAULT_FOLLOW_UP_TIME;
        self.battery.thresholds = Thresholds::default();
    }

    /// Takes over intervals and measurement parameters
    ///
    /// The values are used as given; call [`verify`](Self::verify) afterwards.
    pub fn configure(&mut self, config: &Config) {
        for rail in Rail::ALL {
            let power = config.power.rail(rail);
            self.cycles[rail.index()] = CycleConfig::new(power.interval, power.on_duration);
        }

        self.scan_duration_ms = config.measure.scan_duration;
        for m in Measure::ALL {
            let unit = config.measure.rail(m.rail());
            self.follow_up_time[m.index()] = unit.follow_up_time;
            self.thresholds[m.index()] = thresholds(unit);
            self.references[m.index()] = CalibrationReference {
                mv: unit.calibrate_mv,
                ma: unit.calibrate_ma,
            };
        }

        let batt = config.measure.rail(Rail::Batt);
        self.battery.follow_up_time = batt.follow_up_time;
        self.battery.thresholds = thresholds(batt);
    }

    /// Checks intervals and scan duration
    ///
    /// Invalid power-cycle settings disable cycling for that output, an
    /// out-of-range scan duration is clamped. Both are reported as error
    /// lines and never rejected.
    pub fn verify(&mut self, sink: &mut dyn EventSink) {
        for rail in Rail::ALL {
            if let Err(e) = self.cycles[rail.index()].verify() {
                sink.log_error(&format!("Config File - {}{}", rail, e));
            }
        }

        let requested = self.scan_duration_ms;
        let (clamped, changed) = clamp_scan_duration(requested);
        if changed {
            let reason = if requested > MAX_SCAN_DURATION_MS { "too long" } else { "too small" };
            sink.log_error(&format!(
                "Config File - SCAN_DURATION: Scan time of {}ms is {}, limiting it to {}ms",
                requested, reason, clamped
            ));
            self.scan_duration_ms = clamped;
        }
    }

    /// Power-cycle configuration of a rail
    #[must_use]
    pub fn cycle(&self, rail: Rail) -> CycleConfig {
        self.cycles[rail.index()]
    }

    /// Effective ADC scan duration
    #[must_use]
    pub fn scan_duration_ms(&self) -> u32 {
        self.scan_duration_ms
    }

    // ==================== Rail Switching ====================

    /// Switches a power output
    ///
    /// Does nothing if the output is already in the requested state, and
    /// refuses to switch on while power-fail is asserted. Otherwise logs the
    /// change, updates measurement and requests a power status refresh.
    ///
    /// # Returns
    ///
    /// `true` if the output changed
    pub fn set_rail(&mut self, rail: Rail, switch: Switch, timers: &mut Timers, sink: &mut dyn EventSink) -> bool {
        let on = switch.is_on();
        if on && self.power_fail {
            debug!("Power fail active, {} stays off", rail);
            return false;
        }

        let pin = &mut self.hw.rail_pins[rail.index()];
        if pin.get() == on {
            return false;
        }
        pin.set(on);

        sink.log(&format!("Power Output {} {}abled", rail, if on { "en" } else { "dis" }));

        if let Some(m) = rail.measure() {
            if on {
                timers.cancel(self.follow_up_timers[m.index()]);
                self.hw.measure_pins[m.index()].set(true);
                self.channels.activate(m);
                self.logged[m.index()].reset();
                self.adc_requested = true;
            } else {
                timers.start(self.follow_up_timers[m.index()], self.follow_up_time[m.index()]);
            }
        }

        if on {
            self.battery.logged.reset();
        }

        if rail == Rail::Batt {
            if on {
                timers.cancel(self.batt_follow_up_timer);
                sink.log("BATT_INP: Starting Measuring");
                self.battery.next_due = None;
                self.battery.active = true;
            } else {
                timers.start(self.batt_follow_up_timer, self.battery.follow_up_time);
            }
        }

        sink.display_update(DisplayField::PowerStatus);
        true
    }

    /// Whether a power output is switched on
    #[must_use]
    pub fn is_rail_on(&self, rail: Rail) -> bool {
        self.hw.rail_pins[rail.index()].get()
    }

    /// Sequencing phase of a rail
    #[must_use]
    pub fn phase(&self, rail: Rail) -> RailPhase {
        self.phases[rail.index()]
    }

    /// Handles a power alarm
    ///
    /// An OFF alarm ends power cycling. An ON alarm starts the cycle timer
    /// with the ON duration when one is configured; while power fail is
    /// asserted the rail stays OFF_STEADY.
    ///
    /// # Returns
    ///
    /// The switch to apply to the output
    pub fn on_power_alarm(&mut self, rail: Rail, switch: Switch, timers: &mut Timers) -> Switch {
        let i = rail.index();
        let cycle = self.cycles[i];

        match switch {
            Switch::Off => {
                timers.cancel(self.cycle_timers[i]);
                self.phases[i] = RailPhase::OffSteady;
            }
            Switch::On if self.power_fail => {
                debug!("Power fail active, {} ON alarm leaves cycling stopped", rail);
            }
            Switch::On => {
                if cycle.starts_on_alarm() {
                    timers.start(self.cycle_timers[i], secs(cycle.on_duration));
                }
                self.phases[i] = if cycle.is_cycling() && cycle.starts_on_alarm() {
                    RailPhase::CyclingOn
                } else {
                    RailPhase::OnSteady
                };
            }
        }

        switch
    }

    /// Handles expiry of a rail's cycle timer
    ///
    /// Toggles between the ON and OFF phase and re-arms the timer for the
    /// next phase.
    ///
    /// # Returns
    ///
    /// The switch to apply, `None` if cycling is disabled for the rail
    pub fn on_cycle_timer(&mut self, rail: Rail, timers: &mut Timers) -> Option<Switch> {
        let i = rail.index();
        let cycle = self.cycles[i];
        if !cycle.is_cycling() || self.power_fail {
            return None;
        }

        match self.phases[i] {
            RailPhase::CyclingOn | RailPhase::OnSteady => {
                timers.start(self.cycle_timers[i], secs(cycle.off_duration()));
                self.phases[i] = RailPhase::CyclingOff;
                Some(Switch::Off)
            }
            RailPhase::CyclingOff | RailPhase::OffSteady => {
                timers.start(self.cycle_timers[i], secs(cycle.on_duration));
                self.phases[i] = RailPhase::CyclingOn;
                Some(Switch::On)
            }
        }
    }

    /// Follow-up time of a measurement unit elapsed
    ///
    /// Removes the unit's channels from the scan and disables the unit. The
    /// ADC is stopped by the next [`tick`](Self::tick) once no channel is left.
    pub fn on_follow_up_expired(&mut self, measure: Measure) {
        if self.channels.deactivate(measure) {
            self.adc_requested = false;
        }
        self.hw.measure_pins[measure.index()].set(false);
    }

    /// Follow-up time of the battery input elapsed
    pub fn on_battery_follow_up_expired(&mut self, sink: &mut dyn EventSink) {
        self.battery.active = false;
        sink.log("BATT_INP: Measuring stopped");
    }

    // ==================== Power Fail ====================

    /// Asserts power-fail and switches everything off
    ///
    /// Power cycling is stopped; outputs come back with the next ON alarm
    /// after power-fail is cleared.
    pub fn power_fail(&mut self, timers: &mut Timers, sink: &mut dyn EventSink) {
        self.power_fail = true;
        sink.log("Switching all power outputs OFF");

        for rail in Rail::ALL {
            timers.cancel(self.cycle_timers[rail.index()]);
            self.phases[rail.index()] = RailPhase::OffSteady;
            self.set_rail(rail, Switch::Off, timers, sink);
        }
    }

    /// Clears power-fail; outputs stay off
    pub fn power_restored(&mut self) {
        self.power_fail = false;
    }

    /// Whether power-fail is asserted
    #[must_use]
    pub fn is_power_fail(&self) -> bool {
        self.power_fail
    }

    // ==================== Measurement ====================

    /// Stores a raw ADC sample; channels outside the active set are dropped
    pub fn store_sample(&mut self, channel: u8, raw: u32) {
        if channel < 8 && self.channels.mask() & (1 << channel) != 0 {
            self.channels.store(channel, raw);
        }
    }

    /// Whether the ADC scan is running
    #[must_use]
    pub fn is_adc_running(&self) -> bool {
        self.adc_running
    }

    /// Whether a measurement unit is scanned
    #[must_use]
    pub fn is_measuring(&self, measure: Measure) -> bool {
        self.channels.is_active(measure)
    }

    /// Whether the battery input is logged
    #[must_use]
    pub fn is_battery_measuring(&self) -> bool {
        self.battery.active
    }

    fn unit(rail: Rail) -> Result<Measure> {
        rail.measure().ok_or(TamdlError::NoMeasurement(rail))
    }

    /// Voltage of a rail in mV
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::NoMeasurement`] for a rail without measurement unit
    pub fn voltage(&self, rail: Rail) -> Result<u32> {
        let m = Self::unit(rail)?;
        Ok(to_millis(self.channels.raw_voltage(m), self.divisors.voltage(m)))
    }

    /// Current of a rail in mA
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::NoMeasurement`] for a rail without measurement unit
    pub fn current(&self, rail: Rail) -> Result<u32> {
        let m = Self::unit(rail)?;
        Ok(to_millis(self.channels.raw_current(m), self.divisors.current(m)))
    }

    /// Raw ADC value corresponding to a voltage
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::NoMeasurement`] for a rail without measurement unit
    pub fn voltage_to_adc(&self, rail: Rail, mv: u32) -> Result<u32> {
        let m = Self::unit(rail)?;
        Ok(to_raw(mv, self.divisors.voltage(m)))
    }

    /// Raw ADC value corresponding to a current
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::NoMeasurement`] for a rail without measurement unit
    pub fn current_to_adc(&self, rail: Rail, ma: u32) -> Result<u32> {
        let m = Self::unit(rail)?;
        Ok(to_raw(ma, self.divisors.current(m)))
    }

    /// Current calibration divisors
    #[must_use]
    pub fn divisors(&self) -> Divisors {
        self.divisors
    }

    // ==================== Calibration ====================

    /// Configured calibration reference of an output
    ///
    /// # Errors
    ///
    /// Returns an error for a rail without measurement unit
    pub fn calibration_reference(&self, rail: Rail) -> Result<CalibrationReference> {
        Ok(self.references[Self::unit(rail)?.index()])
    }

    /// Calibrates the voltage measurement against a known voltage
    ///
    /// The divisor is computed from the last raw sample and persisted.
    ///
    /// # Arguments
    ///
    /// * `rail` - Output to calibrate (UA1 or UA2)
    /// * `reference_mv` - Voltage currently applied, in mV
    ///
    /// # Errors
    ///
    /// Returns an error for a rail without measurement unit, an unusable
    /// reference or sample, or a storage failure. The divisor is unchanged
    /// unless the error comes from storage.
    pub fn calibrate_voltage(&mut self, rail: Rail, reference_mv: u32, sink: &mut dyn EventSink) -> Result<u32> {
        let m = Self::unit(rail)?;
        let raw = self.channels.raw_voltage(m);
        let divisor = self.divisors.calibrate_voltage(m, raw, reference_mv).map_err(|e| {
            sink.log_error(&format!("Calibration of {} voltage refused: {}", rail, e));
            e
        })?;

        sink.log(&format!(
            "Calibration of {} voltage: {}mV, divisor 0x{:08X}",
            rail, reference_mv, divisor
        ));
        self.write_calibration(sink)?;
        Ok(divisor)
    }

    /// Calibrates the current measurement against a known current
    ///
    /// # Errors
    ///
    /// See [`calibrate_voltage`](Self::calibrate_voltage)
    pub fn calibrate_current(&mut self, rail: Rail, reference_ma: u32, sink: &mut dyn EventSink) -> Result<u32> {
        let m = Self::unit(rail)?;
        let raw = self.channels.raw_current(m);
        let divisor = self.divisors.calibrate_current(m, raw, reference_ma).map_err(|e| {
            sink.log_error(&format!("Calibration of {} current refused: {}", rail, e));
            e
        })?;

        sink.log(&format!(
            "Calibration of {} current: {}mA, divisor 0x{:08X}",
            rail, reference_ma, divisor
        ));
        self.write_calibration(sink)?;
        Ok(divisor)
    }

    /// Persists the calibration divisors
    ///
    /// The block is written inside a critical section so no tick observes
    /// a half-written image.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn write_calibration(&mut self, sink: &mut dyn EventSink) -> Result<()> {
        let block = self.divisors.encode();
        let storage = &mut self.hw.storage;
        critical_section::with(|_| storage.write_block(&block))?;

        sink.log("Calibration Values have been saved to Flash");
        Ok(())
    }

    // ==================== Service Loop ====================

    /// Periodic measurement work from the service loop
    ///
    /// Starts or stops the ADC as requested, logs UA readings that moved by
    /// their thresholds and reads the battery gauge at most every
    /// [`BATT_MEASURE_INTERVAL`].
    pub fn tick(&mut self, now: Instant, sink: &mut dyn EventSink) {
        if self.adc_requested && !self.adc_running {
            sink.log("ADC is switched ON");
            self.hw.adc.start_scan(ADC_SCAN_MASK, self.scan_duration_ms);
            self.adc_running = true;
            self.battery.next_due = None;
        } else if !self.adc_requested && self.adc_running {
            self.hw.adc.stop_scan();
            self.adc_running = false;
            sink.log("ADC is switched off");
        }

        for m in Measure::ALL {
            if !self.channels.is_active(m) {
                continue;
            }

            let mv = to_millis(self.channels.raw_voltage(m), self.divisors.voltage(m))
                .saturating_add(VOLTAGE_ROUNDING_MV);
            let ma = to_millis(self.channels.raw_current(m), self.divisors.current(m));

            if self.logged[m.index()].update(i64::from(mv), i64::from(ma), &self.thresholds[m.index()]) {
                sink.log(&format!(
                    "UA{}     : {:2}.{}V {:4}mA",
                    m.index() + 1,
                    mv / 1000,
                    (mv % 1000) / 100,
                    ma
                ));
                self.battery.pending = true;
            }
        }

        self.battery_tick(now, sink);
    }

    fn battery_tick(&mut self, now: Instant, sink: &mut dyn EventSink) {
        let battery = &mut self.battery;
        if !battery.pending && !battery.active {
            return;
        }
        if battery.next_due.is_some_and(|due| now < due) {
            return;
        }

        let Some(gauge) = self.hw.battery.as_mut() else {
            battery.pending = false;
            return;
        };

        battery.next_due = Some(now + BATT_MEASURE_INTERVAL);
        let reading = (gauge.voltage_mv(), gauge.current_ma());

        let mut log = battery.pending;
        if !log {
            if let (Some(mv), Some(ma)) = reading {
                log = battery
                    .logged
                    .update(i64::from(mv), i64::from(ma), &battery.thresholds);
            }
        }

        if log {
            match reading {
                (Some(mv), Some(ma)) => sink.log(&format!(
                    "BATT_INP: {:2}.{}V {:4}mA",
                    mv / 1000,
                    (mv % 1000) / 100,
                    ma
                )),
                _ => sink.log("BATT_INP: Battery Controller Read Error"),
            }
        }

        battery.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::calibration::UNITY_DIVISOR;
    use crate::events::mocks::RecordingSink;
    use crate::hal::sim::{MemStorage, SimBattery, SimBoard};
    use crate::hal::{BatteryGauge, MockBatteryGauge};

    struct Fixture {
        seq: PowerSequencer,
        timers: Timers,
        sink: RecordingSink,
        board: SimBoard,
        storage: MemStorage,
    }

    fn fixture_with(storage: MemStorage, battery: Option<Box<dyn BatteryGauge>>) -> Fixture {
        let board = SimBoard::new();
        let mut timers = Timers::new();
        let mut sink = RecordingSink::new();
        let hw = board.hardware(Box::new(storage.clone()), battery);
        let seq = PowerSequencer::new(hw, &mut timers, &mut sink).unwrap();
        Fixture {
            seq,
            timers,
            sink,
            board,
            storage,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MemStorage::new(), None)
    }

    fn cycling_config(rail: Rail, interval: i32, on_duration: i32) -> Config {
        let mut config = Config::default();
        match rail {
            Rail::Ua1 => {
                config.power.ua1.interval = interval;
                config.power.ua1.on_duration = on_duration;
            }
            Rail::Ua2 => {
                config.power.ua2.interval = interval;
                config.power.ua2.on_duration = on_duration;
            }
            Rail::Batt => {
                config.power.batt.interval = interval;
                config.power.batt.on_duration = on_duration;
            }
        }
        config
    }

    impl Fixture {
        fn set(&mut self, rail: Rail, switch: Switch) -> bool {
            self.seq.set_rail(rail, switch, &mut self.timers, &mut self.sink)
        }

        /// Advances one second, dispatching sequencer events
        fn tick_second(&mut self) -> Vec<Event> {
            let events: Vec<Event> = self.timers.tick().into_iter().collect();
            for &event in &events {
                match event {
                    Event::PowerCycle(rail) => {
                        if let Some(switch) = self.seq.on_cycle_timer(rail, &mut self.timers) {
                            self.set(rail, switch);
                        }
                    }
                    Event::MeasureStop(m) => self.seq.on_follow_up_expired(m),
                    Event::BatteryMeasureStop => self.seq.on_battery_follow_up_expired(&mut self.sink),
                    Event::PowerAlarm(_) | Event::TransponderAbsent => {}
                }
            }
            events
        }

        fn alarm(&mut self, rail: Rail, switch: Switch) {
            let switch = self.seq.on_power_alarm(rail, switch, &mut self.timers);
            self.set(rail, switch);
        }
    }

    // ==================== Init Tests ====================

    #[test]
    fn test_new_switches_everything_off() {
        let board = SimBoard::new();
        let mut hw = board.hardware(Box::new(MemStorage::new()), None);
        hw.rail_pins[0].set(true);
        hw.measure_pins[1].set(true);

        let mut timers = Timers::new();
        let mut sink = RecordingSink::new();
        let seq = PowerSequencer::new(hw, &mut timers, &mut sink).unwrap();
        for rail in Rail::ALL {
            assert!(!seq.is_rail_on(rail));
        }
        assert!(!board.measure(Measure::Ua2));
        assert_eq!(timers.len(), 6);
    }

    #[test]
    fn test_new_fails_on_small_timer_pool() {
        let board = SimBoard::new();
        let mut timers = Timers::new();
        for _ in 0..crate::system::TIMER_POOL_SIZE - 2 {
            timers.create(Event::TransponderAbsent).unwrap();
        }
        let mut sink = RecordingSink::new();
        let result = PowerSequencer::new(board.hardware(Box::new(MemStorage::new()), None), &mut timers, &mut sink);
        assert!(matches!(result, Err(TamdlError::TimerPoolExhausted { .. })));
    }

    #[test]
    fn test_missing_calibration_uses_defaults() {
        let f = fixture();
        assert_eq!(f.seq.divisors(), Divisors::default());
        assert_eq!(f.sink.count_containing("Wrong magic or checksum - using defaults"), 1);
    }

    #[test]
    fn test_stored_calibration_loaded() {
        let mut divisors = Divisors::default();
        divisors.calibrate_voltage(Measure::Ua2, 40_000, 12_000).unwrap();
        let f = fixture_with(MemStorage::with_contents(&divisors.encode()), None);
        assert_eq!(f.seq.divisors(), divisors);
        assert_eq!(f.sink.count_containing("using defaults"), 0);
    }

    #[test]
    fn test_corrupt_calibration_byte_falls_back() {
        let mut divisors = Divisors::default();
        divisors.calibrate_current(Measure::Ua1, 300, 100).unwrap();
        let image = divisors.encode();

        for i in 0..image.len() {
            let mut corrupt = image;
            corrupt[i] ^= 0x01;
            let f = fixture_with(MemStorage::with_contents(&corrupt), None);
            assert_eq!(f.seq.divisors(), Divisors::default(), "byte {}", i);
        }
    }

    // ==================== Verify Tests ====================

    #[test]
    fn test_verify_invalidates_bad_interval() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Ua2, 8, 5));
        f.seq.verify(&mut f.sink);

        assert!(f.seq.cycle(Rail::Ua2).is_invalid());
        assert_eq!(
            f.sink.errors(),
            vec!["Config File - UA2_INTERVAL: Value 8s is too small, minimum is 10s".to_string()]
        );
    }

    #[test]
    fn test_verify_keeps_valid_interval() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Batt, 60, 20));
        f.seq.verify(&mut f.sink);
        assert_eq!(f.seq.cycle(Rail::Batt), CycleConfig::new(60, 20));
        assert!(f.sink.errors().is_empty());
    }

    #[test]
    fn test_verify_clamps_scan_duration() {
        let mut f = fixture();
        let mut config = Config::default();
        config.measure.scan_duration = 10;
        f.seq.configure(&config);
        f.seq.verify(&mut f.sink);
        assert_eq!(f.seq.scan_duration_ms(), 52);
        assert_eq!(f.sink.count_containing("Scan time of 10ms is too small, limiting it to 52ms"), 1);

        config.measure.scan_duration = 3000;
        f.seq.configure(&config);
        f.seq.verify(&mut f.sink);
        assert_eq!(f.seq.scan_duration_ms(), 2200);
        assert_eq!(f.sink.count_containing("is too long, limiting it to 2200ms"), 1);
    }

    #[test]
    fn test_clear_configuration() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Ua1, 60, 20));
        f.seq.clear_configuration();
        assert_eq!(f.seq.cycle(Rail::Ua1), CycleConfig::disabled());
        assert_eq!(f.seq.scan_duration_ms(), DEFAULT_SCAN_DURATION_MS);
    }

    #[test]
    fn test_calibration_references_follow_config() {
        let mut f = fixture();
        let mut config = Config::default();
        config.measure.ua2.calibrate_mv = 12_000;
        config.measure.ua2.calibrate_ma = 250;
        f.seq.configure(&config);

        assert_eq!(
            f.seq.calibration_reference(Rail::Ua2).unwrap(),
            CalibrationReference { mv: 12_000, ma: 250 }
        );
        assert_eq!(f.seq.calibration_reference(Rail::Ua1).unwrap(), CalibrationReference::default());
        assert!(matches!(
            f.seq.calibration_reference(Rail::Batt),
            Err(TamdlError::NoMeasurement(Rail::Batt))
        ));

        f.seq.clear_configuration();
        assert_eq!(f.seq.calibration_reference(Rail::Ua2).unwrap(), CalibrationReference::default());
    }

    // ==================== set_rail Tests ====================

    #[test]
    fn test_set_rail_idempotent() {
        let mut f = fixture();
        assert!(f.set(Rail::Ua1, Switch::On));
        assert!(!f.set(Rail::Ua1, Switch::On));

        assert_eq!(f.sink.count_containing("Power Output UA1 enabled"), 1);
        assert_eq!(f.sink.displays(), vec![DisplayField::PowerStatus]);
        assert!(f.board.rail(Rail::Ua1));
    }

    #[test]
    fn test_set_rail_off_when_off_is_silent() {
        let mut f = fixture();
        f.sink.clear();
        assert!(!f.set(Rail::Ua2, Switch::Off));
        assert!(f.sink.events().is_empty());
    }

    #[test]
    fn test_enable_starts_measurement() {
        let mut f = fixture();
        f.set(Rail::Ua1, Switch::On);
        assert!(f.board.measure(Measure::Ua1));
        assert!(f.seq.is_measuring(Measure::Ua1));
        assert!(!f.seq.is_measuring(Measure::Ua2));

        f.seq.tick(Instant::now(), &mut f.sink);
        assert!(f.seq.is_adc_running());
        let adc = f.board.adc.state();
        assert!(adc.running);
        assert_eq!(adc.channel_mask, ADC_SCAN_MASK);
        assert_eq!(adc.scan_duration_ms, DEFAULT_SCAN_DURATION_MS);
        assert_eq!(f.sink.count_containing("ADC is switched ON"), 1);
    }

    #[test]
    fn test_follow_up_stops_measurement_and_adc() {
        let mut f = fixture();
        let mut config = Config::default();
        config.measure.ua1.follow_up_time = 3;
        f.seq.configure(&config);

        f.set(Rail::Ua1, Switch::On);
        f.seq.tick(Instant::now(), &mut f.sink);
        f.set(Rail::Ua1, Switch::Off);

        f.tick_second();
        f.tick_second();
        assert!(f.seq.is_measuring(Measure::Ua1));
        assert_eq!(f.tick_second(), vec![Event::MeasureStop(Measure::Ua1)]);
        assert!(!f.seq.is_measuring(Measure::Ua1));
        assert!(!f.board.measure(Measure::Ua1));

        f.seq.tick(Instant::now(), &mut f.sink);
        assert!(!f.board.adc.state().running);
        assert_eq!(f.sink.count_containing("ADC is switched off"), 1);
    }

    #[test]
    fn test_adc_keeps_running_for_other_unit() {
        let mut f = fixture();
        let mut config = Config::default();
        config.measure.ua1.follow_up_time = 1;
        f.seq.configure(&config);

        f.set(Rail::Ua1, Switch::On);
        f.set(Rail::Ua2, Switch::On);
        f.seq.tick(Instant::now(), &mut f.sink);
        f.set(Rail::Ua1, Switch::Off);
        f.tick_second();

        f.seq.tick(Instant::now(), &mut f.sink);
        assert!(f.board.adc.state().running);
        assert!(f.seq.is_measuring(Measure::Ua2));
    }

    #[test]
    fn test_reenable_cancels_follow_up() {
        let mut f = fixture();
        let mut config = Config::default();
        config.measure.ua2.follow_up_time = 2;
        f.seq.configure(&config);

        f.set(Rail::Ua2, Switch::On);
        f.set(Rail::Ua2, Switch::Off);
        f.tick_second();
        f.set(Rail::Ua2, Switch::On);
        for _ in 0..5 {
            assert!(f.tick_second().is_empty());
        }
        assert!(f.seq.is_measuring(Measure::Ua2));
    }

    // ==================== Cycling Tests ====================

    #[test]
    fn test_alarm_driven_cycling() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Ua2, 15, 5));
        f.seq.verify(&mut f.sink);

        f.alarm(Rail::Ua2, Switch::On);
        assert!(f.seq.is_rail_on(Rail::Ua2));
        assert_eq!(f.seq.phase(Rail::Ua2), RailPhase::CyclingOn);

        let mut trace = Vec::new();
        for _ in 0..40 {
            f.tick_second();
            trace.push(f.seq.is_rail_on(Rail::Ua2));
        }

        // on for 5s, off for 10s, repeating
        for (second, on) in trace.iter().enumerate() {
            let t = (second + 1) % 15;
            assert_eq!(*on, t < 5, "second {}", second + 1);
        }

        f.alarm(Rail::Ua2, Switch::Off);
        assert_eq!(f.seq.phase(Rail::Ua2), RailPhase::OffSteady);
        for _ in 0..30 {
            f.tick_second();
            assert!(!f.seq.is_rail_on(Rail::Ua2));
        }
    }

    #[test]
    fn test_invalid_cycle_keeps_rail_steady() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Ua1, 12, 9));
        f.seq.verify(&mut f.sink);

        f.alarm(Rail::Ua1, Switch::On);
        assert_eq!(f.seq.phase(Rail::Ua1), RailPhase::OnSteady);
        for _ in 0..30 {
            f.tick_second();
            assert!(f.seq.is_rail_on(Rail::Ua1));
        }
    }

    #[test]
    fn test_on_duration_without_interval_does_not_cycle() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Batt, 0, 5));
        f.alarm(Rail::Batt, Switch::On);
        for _ in 0..10 {
            f.tick_second();
        }
        assert!(f.seq.is_rail_on(Rail::Batt));
    }

    // ==================== Power Fail Tests ====================

    #[test]
    fn test_power_fail_refuses_enable() {
        let mut f = fixture();
        f.set(Rail::Ua1, Switch::On);
        f.set(Rail::Batt, Switch::On);

        f.seq.power_fail(&mut f.timers, &mut f.sink);
        assert!(f.sink.lines().contains(&"Switching all power outputs OFF".to_string()));
        for rail in Rail::ALL {
            assert!(!f.seq.is_rail_on(rail));
        }

        f.sink.clear();
        assert!(!f.set(Rail::Ua2, Switch::On));
        assert!(!f.seq.is_rail_on(Rail::Ua2));
        assert!(f.sink.events().is_empty());
        assert!(!f.set(Rail::Ua2, Switch::Off));

        f.seq.power_restored();
        assert!(!f.seq.is_rail_on(Rail::Ua1));
        assert!(f.set(Rail::Ua2, Switch::On));
    }

    #[test]
    fn test_power_fail_stops_cycling() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Ua1, 10, 5));
        f.seq.verify(&mut f.sink);
        f.alarm(Rail::Ua1, Switch::On);

        f.seq.power_fail(&mut f.timers, &mut f.sink);
        f.seq.power_restored();
        for _ in 0..30 {
            assert!(f.tick_second().is_empty());
        }
        assert!(!f.seq.is_rail_on(Rail::Ua1));
    }

    #[test]
    fn test_on_alarm_during_power_fail_keeps_off_steady() {
        let mut f = fixture();
        f.seq.configure(&cycling_config(Rail::Ua2, 20, 5));
        f.seq.verify(&mut f.sink);

        f.seq.power_fail(&mut f.timers, &mut f.sink);
        f.alarm(Rail::Ua2, Switch::On);
        assert_eq!(f.seq.phase(Rail::Ua2), RailPhase::OffSteady);
        assert!(!f.seq.is_rail_on(Rail::Ua2));

        f.seq.power_restored();
        for _ in 0..40 {
            assert!(f.tick_second().is_empty());
        }
        assert!(!f.seq.is_rail_on(Rail::Ua2));
        assert_eq!(f.seq.phase(Rail::Ua2), RailPhase::OffSteady);

        // the next ON alarm restarts cycling
        f.alarm(Rail::Ua2, Switch::On);
        assert!(f.seq.is_rail_on(Rail::Ua2));
        assert_eq!(f.seq.phase(Rail::Ua2), RailPhase::CyclingOn);
    }

    // ==================== Measurement Tests ====================

    #[test]
    fn test_samples_only_for_active_channels() {
        let mut f = fixture();
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 5000);
        assert_eq!(f.seq.voltage(Rail::Ua1).unwrap(), 0);

        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 5000);
        f.seq.store_sample(Measure::Ua1.current_channel(), 120);
        assert_eq!(f.seq.voltage(Rail::Ua1).unwrap(), 5000);
        assert_eq!(f.seq.current(Rail::Ua1).unwrap(), 120);
    }

    #[test]
    fn test_batt_has_no_measurement_unit() {
        let f = fixture();
        assert!(matches!(f.seq.voltage(Rail::Batt), Err(TamdlError::NoMeasurement(Rail::Batt))));
        assert!(matches!(f.seq.current_to_adc(Rail::Batt, 10), Err(TamdlError::NoMeasurement(_))));
    }

    #[test]
    fn test_tick_logs_only_on_threshold() {
        let mut f = fixture();
        let now = Instant::now();
        f.set(Rail::Ua2, Switch::On);
        f.seq.store_sample(Measure::Ua2.voltage_channel(), 12_340);
        f.seq.store_sample(Measure::Ua2.current_channel(), 250);

        f.seq.tick(now, &mut f.sink);
        assert!(f.sink.lines().contains(&"UA2     : 12.3V  250mA".to_string()));

        f.seq.store_sample(Measure::Ua2.voltage_channel(), 12_380);
        f.seq.tick(now, &mut f.sink);
        assert_eq!(f.sink.count_containing("UA2     :"), 1);

        f.seq.store_sample(Measure::Ua2.current_channel(), 262);
        f.seq.tick(now, &mut f.sink);
        assert_eq!(f.sink.count_containing("UA2     :"), 2);
    }

    #[test]
    fn test_reenable_logs_first_reading_again() {
        let mut f = fixture();
        let now = Instant::now();
        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 5_000);
        f.seq.tick(now, &mut f.sink);
        f.set(Rail::Ua1, Switch::Off);
        f.set(Rail::Ua1, Switch::On);
        f.seq.tick(now, &mut f.sink);
        assert_eq!(f.sink.count_containing("UA1     :  5.0V"), 2);
    }

    // ==================== Battery Tests ====================

    #[test]
    fn test_batt_enable_logs_gauge_immediately() {
        let mut f = fixture_with(MemStorage::new(), Some(Box::new(SimBattery::default())));
        f.set(Rail::Batt, Switch::On);
        assert_eq!(f.sink.count_containing("BATT_INP: Starting Measuring"), 1);

        f.seq.tick(Instant::now(), &mut f.sink);
        assert!(f.sink.lines().contains(&"BATT_INP: 12.6V    0mA".to_string()));
    }

    #[test]
    fn test_batt_readout_rate_limited() {
        let mut gauge = MockBatteryGauge::new();
        gauge.expect_voltage_mv().times(2).returning(|| Some(11_000));
        gauge.expect_current_ma().times(2).returning(|| Some(40));

        let mut f = fixture_with(MemStorage::new(), Some(Box::new(gauge)));
        let start = Instant::now();
        f.set(Rail::Batt, Switch::On);

        f.seq.tick(start, &mut f.sink);
        f.seq.tick(start + Duration::from_millis(100), &mut f.sink);
        f.seq.tick(start + Duration::from_millis(499), &mut f.sink);
        f.seq.tick(start + BATT_MEASURE_INTERVAL, &mut f.sink);

        // second readout is unchanged and not logged
        assert_eq!(f.sink.count_containing("BATT_INP: 11.0V   40mA"), 1);
    }

    #[test]
    fn test_batt_read_error() {
        let mut gauge = MockBatteryGauge::new();
        gauge.expect_voltage_mv().returning(|| None);
        gauge.expect_current_ma().returning(|| None);

        let mut f = fixture_with(MemStorage::new(), Some(Box::new(gauge)));
        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 3_300);
        f.seq.tick(Instant::now(), &mut f.sink);

        assert_eq!(f.sink.count_containing("BATT_INP: Battery Controller Read Error"), 1);
    }

    #[test]
    fn test_ua_log_forces_batt_log() {
        let mut f = fixture_with(MemStorage::new(), Some(Box::new(SimBattery::default())));
        let start = Instant::now();
        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 3_300);
        f.seq.tick(start, &mut f.sink);
        assert_eq!(f.sink.count_containing("BATT_INP: 12.6V"), 1);

        // UA reading within 500 ms: battery log waits for the interval
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 4_300);
        f.seq.tick(start + Duration::from_millis(200), &mut f.sink);
        assert_eq!(f.sink.count_containing("BATT_INP: 12.6V"), 1);
        f.seq.tick(start + Duration::from_millis(600), &mut f.sink);
        assert_eq!(f.sink.count_containing("BATT_INP: 12.6V"), 2);
    }

    #[test]
    fn test_batt_follow_up_stops_logging() {
        let mut f = fixture_with(MemStorage::new(), Some(Box::new(SimBattery::default())));
        let mut config = Config::default();
        config.measure.batt.follow_up_time = 2;
        f.seq.configure(&config);

        f.set(Rail::Batt, Switch::On);
        f.set(Rail::Batt, Switch::Off);
        assert!(f.seq.is_battery_measuring());
        f.tick_second();
        assert_eq!(f.tick_second(), vec![Event::BatteryMeasureStop]);
        assert!(!f.seq.is_battery_measuring());
        assert_eq!(f.sink.count_containing("BATT_INP: Measuring stopped"), 1);
    }

    // ==================== Calibration Tests ====================

    #[test]
    fn test_calibrate_voltage_round_trip() {
        let mut f = fixture();
        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 31_234);

        f.seq.calibrate_voltage(Rail::Ua1, 5_000, &mut f.sink).unwrap();
        let mv = f.seq.voltage(Rail::Ua1).unwrap();
        assert!((4_999..=5_001).contains(&mv), "got {}", mv);

        assert_eq!(f.storage.contents(), f.seq.divisors().encode().to_vec());
        assert_eq!(f.sink.count_containing("Calibration Values have been saved to Flash"), 1);

        let adc = f.seq.voltage_to_adc(Rail::Ua1, 5_000).unwrap();
        assert!((31_233..=31_234).contains(&adc), "got {}", adc);
    }

    #[test]
    fn test_calibrate_current_round_trip() {
        let mut f = fixture();
        f.set(Rail::Ua2, Switch::On);
        f.seq.store_sample(Measure::Ua2.current_channel(), 777);

        f.seq.calibrate_current(Rail::Ua2, 250, &mut f.sink).unwrap();
        let ma = f.seq.current(Rail::Ua2).unwrap();
        assert!((249..=251).contains(&ma), "got {}", ma);
        assert_eq!(f.seq.divisors().voltage(Measure::Ua2), UNITY_DIVISOR);
    }

    #[test]
    fn test_calibrate_zero_reference_refused() {
        let mut f = fixture();
        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.voltage_channel(), 1_000);

        let result = f.seq.calibrate_voltage(Rail::Ua1, 0, &mut f.sink);
        assert!(matches!(result, Err(TamdlError::ZeroCalibrationReference)));
        assert_eq!(f.seq.divisors(), Divisors::default());
        assert!(f.storage.contents().is_empty());
        assert_eq!(f.sink.errors().len(), 1);
    }

    #[test]
    fn test_calibration_survives_restart() {
        let mut f = fixture();
        f.set(Rail::Ua1, Switch::On);
        f.seq.store_sample(Measure::Ua1.current_channel(), 400);
        f.seq.calibrate_current(Rail::Ua1, 100, &mut f.sink).unwrap();

        let restarted = fixture_with(MemStorage::with_contents(&f.storage.contents()), None);
        assert_eq!(restarted.seq.divisors(), f.seq.divisors());
    }
}
