//! Tick-based timing primitive.
//!
//! The handheld target exposes two 16-bit hardware counters, the first
//! prescaled from the bus clock by 256 and the second counting overflows of
//! the first. Read together they form one free-running 32-bit counter.
//! [`CascadedTimer`] reproduces that counter on a host from a monotonic
//! clock; [`SimulatedTimer`] is a manually driven counter for tests and the
//! in-memory backend.
//!
//! Elapsed spans use wrapping subtraction, so a single counter overflow
//! between two readings resolves correctly. A span longer than one full
//! period (2^32 ticks, about nine hours at the default rate) is not
//! detected.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// Bus clock of the reference handheld, in Hz.
pub const DEFAULT_BUS_CLOCK_HZ: u32 = 33_513_982;

/// Divider between the bus clock and the low counter.
pub const TIMER_PRESCALER: u32 = 256;

/// A reading of the 32-bit tick counter, or a span between two readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct Ticks(pub u32);

impl Ticks {
    /// Span from `start` to `self`, tolerant of one counter wraparound.
    pub fn since(self, start: Ticks) -> Ticks {
        Ticks(self.0.wrapping_sub(start.0))
    }
}

impl fmt::Display for Ticks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

/// `end - start` with unsigned wraparound.
pub fn elapsed(start: Ticks, end: Ticks) -> Ticks {
    end.since(start)
}

/// Source of monotonic ticks at a fixed rate.
pub trait TimerSource {
    /// Zero the counter.
    fn reset(&mut self);

    /// Current counter value.
    fn now(&self) -> Ticks;

    /// Ticks per second.
    fn tick_rate(&self) -> f64;

    fn to_seconds(&self, ticks: Ticks) -> f64 {
        f64::from(ticks.0) / self.tick_rate()
    }
}

/// Host emulation of the two cascaded 16-bit counters.
#[derive(Debug, Clone)]
pub struct CascadedTimer {
    origin: Instant,
    bus_clock_hz: u32,
}

impl CascadedTimer {
    pub fn new() -> Self {
        Self::with_bus_clock(DEFAULT_BUS_CLOCK_HZ)
    }

    pub fn with_bus_clock(bus_clock_hz: u32) -> Self {
        Self {
            origin: Instant::now(),
            bus_clock_hz: bus_clock_hz.max(TIMER_PRESCALER),
        }
    }

    pub fn bus_clock_hz(&self) -> u32 {
        self.bus_clock_hz
    }

    /// Low and high halves as the hardware would present them.
    fn counters(&self) -> (u16, u16) {
        let nanos = self.origin.elapsed().as_nanos();
        let total = nanos * u128::from(self.bus_clock_hz)
            / (u128::from(TIMER_PRESCALER) * 1_000_000_000);
        let low = (total & 0xFFFF) as u16;
        let high = ((total >> 16) & 0xFFFF) as u16;
        (low, high)
    }
}

impl Default for CascadedTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerSource for CascadedTimer {
    fn reset(&mut self) {
        self.origin = Instant::now();
    }

    fn now(&self) -> Ticks {
        let (low, high) = self.counters();
        Ticks(u32::from(low) | (u32::from(high) << 16))
    }

    fn tick_rate(&self) -> f64 {
        f64::from(self.bus_clock_hz) / f64::from(TIMER_PRESCALER)
    }
}

/// A tick counter that only moves when told to.
///
/// Clones share the same counter, so a simulated storage backend can advance
/// time while the engine reads it. With an auto-step, every `now()` call
/// returns the current value and then advances by the step.
#[derive(Debug, Clone)]
pub struct SimulatedTimer {
    counter: Arc<AtomicU32>,
    auto_step: u32,
    tick_rate: f64,
}

impl SimulatedTimer {
    pub fn new(tick_rate: f64) -> Self {
        Self {
            counter: Arc::new(AtomicU32::new(0)),
            auto_step: 0,
            tick_rate,
        }
    }

    /// Advance by `step` ticks after every reading.
    #[must_use]
    pub fn with_auto_step(mut self, step: u32) -> Self {
        self.auto_step = step;
        self
    }

    pub fn advance(&self, ticks: u32) {
        self.counter.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn set(&self, ticks: Ticks) {
        self.counter.store(ticks.0, Ordering::SeqCst);
    }

    pub fn peek(&self) -> Ticks {
        Ticks(self.counter.load(Ordering::SeqCst))
    }
}

impl Default for SimulatedTimer {
    fn default() -> Self {
        Self::new(f64::from(DEFAULT_BUS_CLOCK_HZ) / f64::from(TIMER_PRESCALER))
    }
}

impl TimerSource for SimulatedTimer {
    fn reset(&mut self) {
        self.counter.store(0, Ordering::SeqCst);
    }

    fn now(&self) -> Ticks {
        Ticks(self.counter.fetch_add(self.auto_step, Ordering::SeqCst))
    }

    fn tick_rate(&self) -> f64 {
        self.tick_rate
    }
}
