//! # BackOff
//!
//! Exponential backoff shared by every blocking path in the crate.
//!
//! None of the locks here park threads in the kernel. A contended `lock()`
//! retries an atomic transition and calls [`BackOff::wait`] between attempts.
//! Each wait spins for twice as long as the previous one (up to a cap), and
//! once the spin count passes a threshold the thread also yields to the OS
//! scheduler so the current holder can make progress.
//!
//! ## Example
//! ```rust
//! use axiom_locks::BackOff;
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! let ready = AtomicBool::new(true);
//! BackOff::new().spin_until(|| ready.load(Ordering::Acquire));
//! ```
//!
//! ## Feature flags
//! - **`std`**: enables yielding to the scheduler under persistent
//!   contention. Without it the backoff only spins.

use core::{cell::Cell, hint::spin_loop};
use std::time::Instant;

/// Maximum spin iteration limit.
const MAX_SPIN: u32 = 1 << 16;

/// Default starting spin count.
const START_VALUE: u32 = 1 << 2;

/// Spin count after which every wait also yields the thread.
#[cfg(feature = "std")]
const YIELD_THRESHOLD: u32 = 1 << 8;

/// Bit shift applied during [`BackOff::relax`].
const RELAX_DIV_BIT_VAL: u32 = 1;

/// A per-call exponential backoff counter.
///
/// A `BackOff` lives on the stack of a single waiting call; it is not meant
/// to be shared between threads.
pub struct BackOff {
    spin: Cell<u32>,
}

impl BackOff {
    /// Creates a new [`BackOff`] with the default starting spin count.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            spin: Cell::new(START_VALUE),
        }
    }

    /// Creates a new [`BackOff`] with a custom starting spin value.
    ///
    /// ```
    /// use axiom_locks::BackOff;
    /// let b = BackOff::new_with(128);
    /// assert_eq!(b.current(), 128);
    /// ```
    #[inline(always)]
    pub const fn new_with(start: u32) -> Self {
        Self {
            spin: Cell::new(start),
        }
    }

    /// Spins for the current count, doubles it, and yields the thread once
    /// contention has lasted past the yield threshold.
    #[inline]
    pub fn wait(&self) {
        let end = self.spin.get();

        for _ in 0..end {
            spin_loop();
        }

        self.spin.set((end << 1).clamp(1, MAX_SPIN));

        #[cfg(feature = "std")]
        if end >= YIELD_THRESHOLD {
            std::thread::yield_now();
        }
    }

    /// Waits until `ready` returns `true`.
    ///
    /// `ready` is polled once before the first wait, so an already satisfied
    /// condition never spins.
    #[inline]
    pub fn spin_until(&self, mut ready: impl FnMut() -> bool) {
        while !ready() {
            self.wait();
        }
    }

    /// Waits until `ready` returns `true` or `deadline` passes.
    ///
    /// Returns whether the condition was observed. The condition is always
    /// polled at least once, even with a deadline in the past.
    pub fn spin_until_deadline(&self, deadline: Instant, mut ready: impl FnMut() -> bool) -> bool {
        loop {
            if ready() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.wait();
        }
    }

    /// Halves the current spin intensity.
    #[inline(always)]
    pub fn relax(&self) {
        let c_spin = self.spin.get();
        self.spin.set((c_spin >> RELAX_DIV_BIT_VAL).max(1));
    }

    /// Returns the current spin iteration value.
    #[inline(always)]
    pub fn current(&self) -> u32 {
        self.spin.get()
    }

    /// Whether the next [`wait`](BackOff::wait) will also yield the thread.
    #[cfg(feature = "std")]
    #[inline(always)]
    pub fn is_yielding(&self) -> bool {
        self.spin.get() >= YIELD_THRESHOLD
    }

    /// Resets the spin count to the default starting value.
    #[inline(always)]
    pub fn reset(&self) {
        self.spin.set(START_VALUE);
    }
}

impl Default for BackOff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exponential_growth_is_capped() {
        let b = BackOff::new();

        let mut prev = b.current();
        for _ in 0..20 {
            b.wait();
            let curr = b.current();
            assert!(curr >= prev, "Backoff spin did not grow");
            prev = curr;
        }

        assert_eq!(b.current(), MAX_SPIN);
    }

    #[test]
    fn test_reset_and_relax() {
        let b = BackOff::new();
        for _ in 0..5 {
            b.wait();
        }
        assert!(b.current() > START_VALUE);

        let before = b.current();
        b.relax();
        assert!(b.current() < before, "Relax did not reduce spin intensity");

        b.reset();
        assert_eq!(b.current(), START_VALUE);
    }

    #[test]
    fn test_relax_never_reaches_zero() {
        let b = BackOff::new_with(1);
        b.relax();
        assert_eq!(b.current(), 1);
        b.wait();
        assert_eq!(b.current(), 2);
    }

    #[test]
    fn test_spin_until_polls_first() {
        let b = BackOff::new();
        let mut calls = 0;
        b.spin_until(|| {
            calls += 1;
            true
        });
        assert_eq!(calls, 1);
        assert_eq!(b.current(), START_VALUE, "satisfied condition must not spin");
    }

    #[test]
    fn test_spin_until_deadline_times_out() {
        let b = BackOff::new();
        let deadline = Instant::now() + Duration::from_millis(5);
        assert!(!b.spin_until_deadline(deadline, || false));
        assert!(Instant::now() >= deadline);

        let past = Instant::now();
        assert!(b.spin_until_deadline(past, || true));
    }
}
