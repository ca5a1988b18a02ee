//! # RFID Reader
//!
//! Lifecycle of the RFID reader: power requests, frame decoding, new-id
//! notification and transponder absence detection.
//!
//! The reader does not drive its power output itself. Operations that need
//! the output switched return a [`PowerRequest`] which the caller executes,
//! so power-fail and sequencing rules stay in one place.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::decoder::{Decoded, FrameDecoder};
use super::protocol::{RfidType, TransponderId};
use crate::clock::timer::TimerHandle;
use crate::config::RfidConfig;
use crate::control::rail::Rail;
use crate::error::Result;
use crate::events::{DisplayField, EventSink};
use crate::system::{Event, Timers};

/// Output switch the caller has to perform
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerRequest {
    /// Nothing to switch
    Keep,
    /// Switch the reader's output on
    On(Rail),
    /// Switch the reader's output off
    Off(Rail),
}

/// How a disable request is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDown {
    /// Power and UART go down now
    Immediate,
    /// Power stays on until the present transponder is reported absent
    DeferredUntilAbsent,
}

/// UART receive error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineError {
    Framing,
    Parity,
}

/// UART error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineErrors {
    pub framing: u32,
    pub parity: u32,
}

/// RFID reader state
#[derive(Debug)]
pub struct RfidReader {
    kind: Option<RfidType>,
    power: Option<Rail>,
    absent_timeout: u32,
    display_when_absent: bool,
    active: bool,
    decoder: FrameDecoder,
    on_requested: bool,
    powered: bool,
    new_run: bool,
    new_id: AtomicBool,
    transponder: TransponderId,
    absent_timer: TimerHandle,
    line_errors: LineErrors,
}

impl RfidReader {
    /// Creates an inactive reader and allocates its absence timer
    ///
    /// # Errors
    ///
    /// Returns an error if the timer pool is exhausted
    pub fn new(timers: &mut Timers) -> Result<Self> {
        Ok(Self {
            kind: None,
            power: None,
            absent_timeout: 0,
            display_when_absent: false,
            active: false,
            decoder: FrameDecoder::new(RfidType::Sr),
            on_requested: false,
            powered: false,
            new_run: false,
            new_id: AtomicBool::new(false),
            transponder: TransponderId::new(),
            absent_timer: timers.create(Event::TransponderAbsent)?,
            line_errors: LineErrors::default(),
        })
    }

    /// Applies a new reader configuration
    ///
    /// A reader powered by the previous configuration is switched off first.
    /// The reader is active only with both type and power output set.
    pub fn init(&mut self, cfg: &RfidConfig, timers: &mut Timers, sink: &mut dyn EventSink) -> PowerRequest {
        let request = if self.powered {
            self.power_off(timers, sink)
        } else {
            PowerRequest::Keep
        };

        self.on_requested = false;
        self.new_run = false;
        self.new_id.store(false, Ordering::SeqCst);
        self.transponder.clear();
        self.kind = cfg.kind;
        self.power = cfg.power;
        self.absent_timeout = cfg.absent_detect_timeout;
        self.display_when_absent = cfg.display_update_when_absent;

        match (cfg.kind, cfg.power) {
            (Some(kind), Some(rail)) => {
                self.active = true;
                self.decoder = FrameDecoder::new(kind);
                sink.log(&format!("Initializing RFID reader of type {} for Power Output {}", kind, rail));
                if self.absent_timeout > 0 {
                    sink.log(&format!(
                        "RFID reader absence detection timeout is {}s",
                        self.absent_timeout
                    ));
                } else {
                    sink.log("WARNING: RFID reader absence detection is disabled");
                }
            }
            _ => {
                self.active = false;
                debug!("RFID reader not configured");
            }
        }

        request
    }

    /// Whether type and power output are configured
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the reader is requested on
    pub fn is_enabled(&self) -> bool {
        self.on_requested
    }

    /// Whether reader power and UART are up
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Configured reader type
    pub fn kind(&self) -> Option<RfidType> {
        self.kind
    }

    /// Output feeding the reader while active
    pub fn power_rail(&self) -> Option<Rail> {
        self.power.filter(|_| self.active)
    }

    /// Transponder currently present, empty if none
    pub fn transponder(&self) -> &str {
        &self.transponder
    }

    /// Whether a new id waits for the service loop
    pub fn has_new_id(&self) -> bool {
        self.new_id.load(Ordering::SeqCst)
    }

    /// Framing/parity error counters
    pub fn line_errors(&self) -> LineErrors {
        self.line_errors
    }

    /// Current decoder position
    pub fn decoder_position(&self) -> usize {
        self.decoder.position()
    }

    /// How a disable request would be carried out right now
    pub fn power_down_mode(&self) -> PowerDown {
        if self.absent_timeout == 0 || self.transponder.is_empty() {
            PowerDown::Immediate
        } else {
            PowerDown::DeferredUntilAbsent
        }
    }

    /// Requests the reader on and starts a new scanning run
    ///
    /// The first frame of a run is always notified, even if it repeats the
    /// previous transponder id.
    pub fn enable(&mut self, sink: &mut dyn EventSink) -> PowerRequest {
        if !self.active {
            return PowerRequest::Keep;
        }

        self.on_requested = true;
        self.new_run = true;

        if self.powered {
            PowerRequest::Keep
        } else {
            self.power_on(sink)
        }
    }

    /// Requests the reader off
    ///
    /// Power goes down immediately unless a transponder is present and
    /// absence detection is configured; then it goes down on absence.
    pub fn disable(&mut self, timers: &mut Timers, sink: &mut dyn EventSink) -> PowerRequest {
        if !self.active || !self.on_requested {
            return PowerRequest::Keep;
        }
        self.on_requested = false;

        match self.power_down_mode() {
            PowerDown::Immediate => {
                timers.cancel(self.absent_timer);
                if self.powered {
                    self.power_off(timers, sink)
                } else {
                    PowerRequest::Keep
                }
            }
            PowerDown::DeferredUntilAbsent => {
                sink.log("RFID power-off deferred - transponder still present");
                PowerRequest::Keep
            }
        }
    }

    /// Counts a UART receive error
    pub fn line_error(&mut self, error: LineError) {
        match error {
            LineError::Framing => self.line_errors.framing += 1,
            LineError::Parity => self.line_errors.parity += 1,
        }
    }

    /// Feeds one received byte; ignored while the UART is down
    pub fn receive(&mut self, byte: u8, timers: &mut Timers, sink: &mut dyn EventSink) {
        if !self.powered {
            return;
        }

        match self.decoder.push(byte) {
            Decoded::Pending => {}
            Decoded::Rejected(err) => sink.log_error(&err.to_string()),
            Decoded::Frame(id) => self.frame_received(id, timers),
        }
    }

    fn frame_received(&mut self, id: TransponderId, timers: &mut Timers) {
        if self.new_run || id != self.transponder {
            self.new_run = false;
            self.transponder = id;
            self.new_id.store(true, Ordering::SeqCst);
        }

        if self.absent_timeout > 0 {
            timers.start(self.absent_timer, self.absent_timeout);
        }
    }

    /// Absence timer expired: no frame within the timeout
    ///
    /// Clears the transponder and completes a deferred power-down.
    pub fn transponder_absent(&mut self, timers: &mut Timers, sink: &mut dyn EventSink) -> PowerRequest {
        sink.log(&format!("Transponder: {} ABSENT", self.transponder));
        self.transponder.clear();

        if self.display_when_absent {
            sink.display_update(DisplayField::Transponder);
        }

        if !self.on_requested && self.powered {
            self.power_off(timers, sink)
        } else {
            PowerRequest::Keep
        }
    }

    /// Service-loop housekeeping
    ///
    /// Brings power in line with the request and delivers a pending new-id
    /// notification.
    pub fn check(&mut self, timers: &mut Timers, sink: &mut dyn EventSink) -> PowerRequest {
        let request = if self.on_requested && !self.powered {
            self.power_on(sink)
        } else if !self.on_requested && self.powered && self.power_down_mode() == PowerDown::Immediate {
            timers.cancel(self.absent_timer);
            self.power_off(timers, sink)
        } else {
            PowerRequest::Keep
        };

        if self.new_id.swap(false, Ordering::SeqCst) {
            sink.log(&format!("Transponder: {}", self.transponder));
            sink.display_update(DisplayField::Transponder);
        }

        request
    }

    /// Powers the reader down without deferral
    pub fn power_fail(&mut self, timers: &mut Timers, sink: &mut dyn EventSink) -> PowerRequest {
        self.on_requested = false;
        if self.powered {
            self.power_off(timers, sink)
        } else {
            PowerRequest::Keep
        }
    }

    fn power_on(&mut self, sink: &mut dyn EventSink) -> PowerRequest {
        let Some(rail) = self.power_rail() else {
            return PowerRequest::Keep;
        };

        sink.log("RFID is powered ON");
        self.decoder.reset();
        self.powered = true;
        PowerRequest::On(rail)
    }

    fn power_off(&mut self, timers: &mut Timers, sink: &mut dyn EventSink) -> PowerRequest {
        self.powered = false;
        self.decoder.reset();
        timers.cancel(self.absent_timer);
        sink.log("RFID is powered off");

        // without its absence timer a stored id would never expire
        if self.absent_timeout > 0 && !self.transponder.is_empty() {
            debug!("Dropping transponder {} on power-off", self.transponder);
            self.transponder.clear();
            self.new_id.store(false, Ordering::SeqCst);
        }

        match self.power {
            Some(rail) => PowerRequest::Off(rail),
            None => {
                warn!("RFID reader was powered without a power output");
                PowerRequest::Keep
            }
        }
    }
}
