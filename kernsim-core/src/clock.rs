//! Monotonic time sources.
//!
//! Simulators never read wall-clock time directly; they go through [`Clock`]
//! so tests can substitute a hand-driven [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A monotonic nanosecond time source.
///
/// Implementations must be strictly non-decreasing: two reads on the same
/// clock never go backwards, even across threads.
pub trait Clock: Send + Sync {
    /// Nanoseconds since an arbitrary epoch fixed at construction.
    fn now_ns(&self) -> u64;

    /// Microseconds since the clock epoch.
    fn now_us(&self) -> u64 {
        self.now_ns() / 1_000
    }

    /// Milliseconds since the clock epoch.
    fn now_ms(&self) -> u64 {
        self.now_ns() / 1_000_000
    }
}

/// Real monotonic clock anchored at construction time.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Hand-driven clock for tests.
///
/// `advance_*` only ever moves forward; there is no way to rewind.
#[derive(Default)]
pub struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance_ns(&self, ns: u64) {
        self.now_ns.fetch_add(ns, Ordering::SeqCst);
    }

    pub fn advance_us(&self, us: u64) {
        self.advance_ns(us * 1_000);
    }

    pub fn advance_ms(&self, ms: u64) {
        self.advance_ns(ms * 1_000_000);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_decreases() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now_ns();
        for _ in 0..1_000 {
            let now = clock.now_ns();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn manual_clock_advances_in_units() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ns(), 0);

        clock.advance_ms(3);
        assert_eq!(clock.now_ms(), 3);

        clock.advance_us(500);
        assert_eq!(clock.now_us(), 3_500);
    }
}
