//! # Soft Timers
//!
//! Fixed-capacity pool of one-shot countdown timers with one-second
//! resolution. Every timer carries an event tag that is handed back when it
//! expires; the owner dispatches the events, so expiry handlers run with
//! full access to the system state instead of inside the tick.
//!
//! ## Usage
//!
//! ```
//! use tamdl::clock::timer::TimerPool;
//!
//! #[derive(Debug, Clone, Copy, PartialEq)]
//! enum Ev { Absent }
//!
//! let mut pool: TimerPool<Ev, 4> = TimerPool::new();
//! let t = pool.create(Ev::Absent).unwrap();
//! pool.start(t, 2);
//! assert!(pool.tick().is_empty());
//! assert_eq!(pool.tick().as_slice(), &[Ev::Absent]);
//! ```

use heapless::Vec;
use tracing::trace;

use crate::error::{Result, TamdlError};

/// Handle of an allocated timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u8);

impl TimerHandle {
    /// Slot index inside the pool
    pub fn index(self) -> usize {
        usize::from(self.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot<E> {
    event: E,
    remaining: Option<u32>,
}

/// Pool of up to `N` soft timers carrying events of type `E`
#[derive(Debug, Clone)]
pub struct TimerPool<E: Copy, const N: usize> {
    slots: Vec<Slot<E>, N>,
}

impl<E: Copy, const N: usize> Default for TimerPool<E, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Copy, const N: usize> TimerPool<E, N> {
    /// Creates an empty pool
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Allocates a timer that reports `event` on expiry
    ///
    /// Timers are allocated once at startup and never freed.
    ///
    /// # Errors
    ///
    /// Returns [`TamdlError::TimerPoolExhausted`] when all `N` slots are in use.
    pub fn create(&mut self, event: E) -> Result<TimerHandle> {
        let index = self.slots.len();
        let handle = u8::try_from(index).map_err(|_| TamdlError::TimerPoolExhausted { capacity: N })?;
        self.slots
            .push(Slot {
                event,
                remaining: None,
            })
            .map_err(|_| TamdlError::TimerPoolExhausted { capacity: N })?;
        Ok(TimerHandle(handle))
    }

    /// Arms a timer to expire after `secs` ticks
    ///
    /// A running countdown is replaced. `0` expires on the next tick.
    pub fn start(&mut self, handle: TimerHandle, secs: u32) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.remaining = Some(secs.max(1));
        }
    }

    /// Disarms a timer; cancelling an idle timer has no effect
    pub fn cancel(&mut self, handle: TimerHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.remaining = None;
        }
    }

    /// Whether the timer is counting down
    #[must_use]
    pub fn is_running(&self, handle: TimerHandle) -> bool {
        self.remaining(handle).is_some()
    }

    /// Seconds left until expiry
    #[must_use]
    pub fn remaining(&self, handle: TimerHandle) -> Option<u32> {
        self.slots.get(handle.index()).and_then(|s| s.remaining)
    }

    /// Number of allocated timers
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no timer is allocated
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Advances all running timers by one second
    ///
    /// # Returns
    ///
    /// Events of the timers that expired in this tick, in allocation order.
    /// Expired timers are disarmed before their event is returned, so a
    /// handler may restart them.
    pub fn tick(&mut self) -> Vec<E, N> {
        let mut expired = Vec::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let Some(remaining) = slot.remaining else {
                continue;
            };
            if remaining <= 1 {
                slot.remaining = None;
                trace!("Soft timer {} expired", index);
                // capacity equals the number of slots
                let _ = expired.push(slot.event);
            } else {
                slot.remaining = Some(remaining - 1);
            }
        }
        expired
    }

    fn slot_mut(&mut self, handle: TimerHandle) -> Option<&mut Slot<E>> {
        let slot = self.slots.get_mut(handle.index());
        debug_assert!(slot.is_some(), "unallocated soft timer {:?}", handle);
        slot
    }
}
