//! # TAMDL Core
//!
//! Ties the time base, soft timers, alarm clock, power sequencer and RFID
//! reader together. The hosting runtime feeds it hardware events (RTC
//! ticks, UART bytes, ADC samples) and calls [`Tamdl::service`] from its
//! main loop; the core never blocks.
//!
//! ## Event flow
//!
//! ```text
//! rtc_tick ──> TimerPool::tick ──┐
//!          └─> AlarmClock::check ┴─> dispatch(Event) ──> PowerSequencer
//!                                                    └─> RfidReader
//! uart_rx  ──> RfidReader::receive
//! service  ──> RfidReader::check, PowerSequencer::tick
//! ```
//!
//! Within one tick, expired timers are dispatched before fired alarms, each
//! in table order.

use chrono::NaiveDateTime;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::clock::alarm::{AlarmClock, AlarmId, ALL_ALARMS};
use crate::clock::timebase::TimeBase;
use crate::clock::timer::TimerPool;
use crate::config::Config;
use crate::control::measure::Measure;
use crate::control::rail::{Rail, RailPhase, Switch};
use crate::control::sequencer::PowerSequencer;
use crate::error::Result;
use crate::events::EventSink;
use crate::hal::Hardware;
use crate::rfid::reader::{LineError, PowerRequest, RfidReader};

/// Action carried by a soft timer or alarm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Power alarm reached its time
    PowerAlarm(AlarmId),
    /// Power-cycle phase of a rail elapsed
    PowerCycle(Rail),
    /// Follow-up time of a measurement unit elapsed
    MeasureStop(Measure),
    /// Follow-up time of the battery input elapsed
    BatteryMeasureStop,
    /// No RFID frame within the absence timeout
    TransponderAbsent,
}

/// Number of soft timers available to the core
pub const TIMER_POOL_SIZE: usize = 12;

/// Soft timer pool of the core
pub type Timers = TimerPool<Event, TIMER_POOL_SIZE>;

/// Control core of the data logger
pub struct Tamdl {
    time: TimeBase,
    timers: Timers,
    alarms: AlarmClock<Event>,
    control: PowerSequencer,
    rfid: RfidReader,
    sink: Box<dyn EventSink>,
}

impl Tamdl {
    /// Creates the core with all outputs off and no alarm enabled
    ///
    /// # Arguments
    ///
    /// * `hw` - Pins, ADC, calibration storage and battery gauge
    /// * `sink` - Receiver of log lines and display notifications
    /// * `start` - Initial wall clock time
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::TimerPoolExhausted`](crate::error::TamdlError::TimerPoolExhausted)
    /// if the components need more soft timers than the pool holds
    pub fn new(hw: Hardware, mut sink: Box<dyn EventSink>, start: NaiveDateTime) -> Result<Self> {
        let mut timers = Timers::new();
        let control = PowerSequencer::new(hw, &mut timers, sink.as_mut())?;
        let rfid = RfidReader::new(&mut timers)?;

        let mut alarms = AlarmClock::new();
        for id in ALL_ALARMS {
            alarms.set_action(id, Event::PowerAlarm(id));
        }

        debug!("{} of {} soft timers allocated", timers.len(), TIMER_POOL_SIZE);
        info!("Control core started at {}", start);

        Ok(Self {
            time: TimeBase::new(start),
            timers,
            alarms,
            control,
            rfid,
            sink,
        })
    }

    /// Replaces the running configuration
    ///
    /// All power alarms are disabled and intervals, measurement parameters
    /// and the RFID selection are reset before the new values are loaded and
    /// verified. Alarm times are shifted by one hour when `clock.dst` is set.
    pub fn apply_config(&mut self, config: &Config) {
        self.alarms.disable_all();
        self.control.clear_configuration();

        let mut loaded = 0;
        for rail in Rail::ALL {
            let power = config.power.rail(rail);
            for (switch, times) in [(Switch::On, &power.on_times), (Switch::Off, &power.off_times)] {
                for (slot, time) in times.iter().enumerate() {
                    let Some(id) = AlarmId::power(rail, switch, slot) else {
                        warn!("Ignoring alarm time {} of {}: table full", time, rail);
                        break;
                    };
                    self.alarms.set(id, time.with_dst(config.clock.dst));
                    self.alarms.enable(id);
                    loaded += 1;
                }
            }
        }
        info!("{} power alarms loaded (DST {})", loaded, if config.clock.dst { "on" } else { "off" });

        self.control.configure(config);
        self.control.verify(self.sink.as_mut());

        let request = self.rfid.init(&config.rfid, &mut self.timers, self.sink.as_mut());
        self.apply(request);
    }

    // ==================== Interrupt Entry Points ====================

    /// One RTC second elapsed
    pub fn rtc_tick(&mut self) {
        let now = self.time.advance();

        for event in self.timers.tick() {
            self.dispatch(event);
        }
        for (_, event) in self.alarms.check(now.time()) {
            self.dispatch(event);
        }
    }

    /// Feeds a raw RTC counter reading and runs every second it covers
    ///
    /// # Returns
    ///
    /// Number of seconds processed
    pub fn rtc_counter(&mut self, count: u32) -> u32 {
        let secs = self.time.update(count);
        for _ in 0..secs {
            self.rtc_tick();
        }
        secs
    }

    /// RFID UART received a byte
    pub fn uart_rx(&mut self, byte: u8) {
        self.rfid.receive(byte, &mut self.timers, self.sink.as_mut());
    }

    /// RFID UART reported a framing or parity error
    ///
    /// The byte itself is still delivered through [`uart_rx`](Self::uart_rx).
    pub fn uart_line_error(&mut self, error: LineError) {
        self.rfid.line_error(error);
    }

    /// ADC delivered a converted sample
    pub fn adc_sample(&mut self, channel: u8, raw: u32) {
        self.control.store_sample(channel, raw);
    }

    // ==================== Service Loop ====================

    /// Deferred work from the main loop
    ///
    /// Delivers transponder notifications, completes pending RFID power
    /// changes and runs measurement logging.
    pub fn service(&mut self, now: Instant) {
        let request = self.rfid.check(&mut self.timers, self.sink.as_mut());
        self.apply(request);
        self.control.tick(now, self.sink.as_mut());
    }

    /// Sets or clears the power-fail condition
    ///
    /// On assertion the RFID reader and all outputs are switched off; while
    /// asserted no output can be switched on. Clearing does not restore any
    /// output.
    pub fn power_fail(&mut self, asserted: bool) {
        if !asserted {
            if self.control.is_power_fail() {
                info!("Power fail cleared");
            }
            self.control.power_restored();
            return;
        }
        if self.control.is_power_fail() {
            return;
        }

        warn!("Power fail asserted");
        self.control.power_fail(&mut self.timers, self.sink.as_mut());
        let request = self.rfid.power_fail(&mut self.timers, self.sink.as_mut());
        self.apply(request);
    }

    /// Switches everything off before the process exits
    pub fn shutdown(&mut self) {
        info!("Shutting down control core");
        self.alarms.disable_all();
        self.power_fail(true);
    }

    // ==================== Dispatch ====================

    fn dispatch(&mut self, event: Event) {
        debug!("Dispatching {:?}", event);
        match event {
            Event::PowerAlarm(id) => {
                let (rail, switch) = id.target();
                let switch = self.control.on_power_alarm(rail, switch, &mut self.timers);
                self.switch_output(rail, switch);
            }
            Event::PowerCycle(rail) => {
                if let Some(switch) = self.control.on_cycle_timer(rail, &mut self.timers) {
                    self.switch_output(rail, switch);
                }
            }
            Event::MeasureStop(measure) => self.control.on_follow_up_expired(measure),
            Event::BatteryMeasureStop => self.control.on_battery_follow_up_expired(self.sink.as_mut()),
            Event::TransponderAbsent => {
                let request = self.rfid.transponder_absent(&mut self.timers, self.sink.as_mut());
                self.apply(request);
            }
        }
    }

    /// Scheduled switch of an output, routed through the RFID reader if it
    /// feeds the reader
    fn switch_output(&mut self, rail: Rail, switch: Switch) {
        if switch.is_on() && self.control.is_power_fail() {
            debug!("Power fail active, ignoring {} ON", rail);
            return;
        }

        if self.rfid.power_rail() == Some(rail) {
            let request = match switch {
                Switch::On => self.rfid.enable(self.sink.as_mut()),
                Switch::Off => self.rfid.disable(&mut self.timers, self.sink.as_mut()),
            };
            self.apply(request);
        } else {
            self.control.set_rail(rail, switch, &mut self.timers, self.sink.as_mut());
        }
    }

    fn apply(&mut self, request: PowerRequest) {
        let (rail, switch) = match request {
            PowerRequest::Keep => return,
            PowerRequest::On(rail) => (rail, Switch::On),
            PowerRequest::Off(rail) => (rail, Switch::Off),
        };
        self.control.set_rail(rail, switch, &mut self.timers, self.sink.as_mut());
    }

    // ==================== Menu / Display Accessors ====================

    /// Switches an output directly, bypassing RFID routing
    ///
    /// # Returns
    ///
    /// `true` if the output changed
    pub fn set_rail(&mut self, rail: Rail, switch: Switch) -> bool {
        self.control.set_rail(rail, switch, &mut self.timers, self.sink.as_mut())
    }

    /// Whether an output is switched on
    #[must_use]
    pub fn is_rail_on(&self, rail: Rail) -> bool {
        self.control.is_rail_on(rail)
    }

    /// Sequencing phase of an output
    #[must_use]
    pub fn phase(&self, rail: Rail) -> RailPhase {
        self.control.phase(rail)
    }

    /// Voltage of an output in mV
    ///
    /// # Errors
    ///
    /// Returns an error for an output without measurement unit
    pub fn voltage(&self, rail: Rail) -> Result<u32> {
        self.control.voltage(rail)
    }

    /// Current of an output in mA
    ///
    /// # Errors
    ///
    /// Returns an error for an output without measurement unit
    pub fn current(&self, rail: Rail) -> Result<u32> {
        self.control.current(rail)
    }

    /// Calibrates an output's voltage measurement and persists the result
    ///
    /// # Errors
    ///
    /// See [`PowerSequencer::calibrate_voltage`]
    pub fn calibrate_voltage(&mut self, rail: Rail, reference_mv: u32) -> Result<u32> {
        self.control.calibrate_voltage(rail, reference_mv, self.sink.as_mut())
    }

    /// Calibrates an output's current measurement and persists the result
    ///
    /// # Errors
    ///
    /// See [`PowerSequencer::calibrate_current`]
    pub fn calibrate_current(&mut self, rail: Rail, reference_ma: u32) -> Result<u32> {
        self.control.calibrate_current(rail, reference_ma, self.sink.as_mut())
    }

    /// Calibrates an output's voltage against `measure.<rail>.calibrate_mv`
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::ZeroCalibrationReference`](crate::error::TamdlError::ZeroCalibrationReference)
    /// if no reference is configured, otherwise see
    /// [`PowerSequencer::calibrate_voltage`]
    pub fn calibrate_voltage_to_reference(&mut self, rail: Rail) -> Result<u32> {
        let reference = self.control.calibration_reference(rail)?;
        self.calibrate_voltage(rail, reference.mv)
    }

    /// Calibrates an output's current against `measure.<rail>.calibrate_ma`
    ///
    /// # Errors
    ///
    /// See [`calibrate_voltage_to_reference`](Self::calibrate_voltage_to_reference)
    pub fn calibrate_current_to_reference(&mut self, rail: Rail) -> Result<u32> {
        let reference = self.control.calibration_reference(rail)?;
        self.calibrate_current(rail, reference.ma)
    }

    /// Persists the current calibration divisors
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn write_calibration(&mut self) -> Result<()> {
        self.control.write_calibration(self.sink.as_mut())
    }

    /// Transponder currently present, empty if none
    #[must_use]
    pub fn transponder(&self) -> &str {
        self.rfid.transponder()
    }

    /// RFID reader state
    #[must_use]
    pub fn rfid(&self) -> &RfidReader {
        &self.rfid
    }

    /// Power sequencer state
    #[must_use]
    pub fn control(&self) -> &PowerSequencer {
        &self.control
    }

    /// Alarm table
    #[must_use]
    pub fn alarms(&self) -> &AlarmClock<Event> {
        &self.alarms
    }

    /// Current wall clock time
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.time.now()
    }

    /// Sets the wall clock
    pub fn set_time(&mut self, now: NaiveDateTime) {
        self.time.set(now);
    }
}
