//! Monotonic time-of-day and signal-based event delivery.
//!
//! The clock counts milliseconds (driven from the 1 ms timer interrupt via
//! [`Clock::tick`]) and maintains a small table of timed events. An event
//! binds a deadline to a [`SignalId`]; when the deadline passes, the signal
//! is raised and the event either rearms (periodic) or is removed
//! (one-shot). Components never read the hardware timer directly - they ask
//! the clock for `now()` or register an event.
//!
//! Uptime accessors back the display's `MM:SS` cell.
//!
//! # Example
//!
//! ```rust
//! use dcc_station::clock::Clock;
//! use dcc_station::signal::Signals;
//!
//! let mut signals = Signals::new();
//! let flag = signals.allocate().unwrap();
//!
//! let mut clock: Clock<4> = Clock::new();
//! assert!(clock.delay_event(200, flag, true)); // every 200 ms
//!
//! clock.advance(450, &signals);
//! assert_eq!(signals.pending(flag), 2);
//! ```

use crate::signal::{SignalId, Signals};
use heapless::Vec;

#[derive(Clone, Copy, Debug)]
struct TimedEvent {
    due_ms: u64,
    period_ms: u32, // zero for one-shot
    signal: SignalId,
}

/// Millisecond clock with a fixed table of timed events.
pub struct Clock<const N: usize = 8> {
    now_ms: u64,
    events: Vec<TimedEvent, N>,
}

impl<const N: usize> Clock<N> {
    /// Create a clock at time zero with no events.
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            events: Vec::new(),
        }
    }

    /// Current time in milliseconds since power-up.
    pub fn now(&self) -> u64 {
        self.now_ms
    }

    /// Whole seconds of uptime.
    pub fn uptime_seconds(&self) -> u32 {
        (self.now_ms / 1000) as u32
    }

    /// Register an event `delay_ms` from now.
    ///
    /// A `repeating` event rearms itself with the same period each time it
    /// fires. Returns `false` when the event table is full.
    #[must_use]
    pub fn delay_event(&mut self, delay_ms: u32, signal: SignalId, repeating: bool) -> bool {
        self.events
            .push(TimedEvent {
                due_ms: self.now_ms + delay_ms as u64,
                period_ms: if repeating { delay_ms } else { 0 },
                signal,
            })
            .is_ok()
    }

    /// Remove every event bound to the given signal.
    pub fn cancel(&mut self, signal: SignalId) {
        let mut index = 0;
        while index < self.events.len() {
            if self.events[index].signal == signal {
                self.events.swap_remove(index);
            } else {
                index += 1;
            }
        }
    }

    /// Advance one millisecond. Called from the timer interrupt.
    pub fn tick(&mut self, signals: &Signals) {
        self.advance(1, signals);
    }

    /// Advance by an arbitrary amount, firing every due event.
    ///
    /// A periodic event whose period is shorter than the step fires once per
    /// elapsed period, so notification counts stay accurate even when test
    /// code jumps time forward coarsely.
    pub fn advance(&mut self, ms: u32, signals: &Signals) {
        self.now_ms += ms as u64;
        let now = self.now_ms;

        let mut index = 0;
        while index < self.events.len() {
            let event = &mut self.events[index];
            if now >= event.due_ms {
                if event.period_ms == 0 {
                    signals.raise(event.signal);
                    self.events.swap_remove(index);
                    continue;
                }
                while now >= event.due_ms {
                    signals.raise(event.signal);
                    event.due_ms += event.period_ms as u64;
                }
            }
            index += 1;
        }
    }

    /// Number of events currently registered.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }
}

impl<const N: usize> Default for Clock<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
