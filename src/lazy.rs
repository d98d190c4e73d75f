//! # Lazily initialized values
//!
//! [`OnceCell`] and [`Lazy`] store a value that is computed at most once
//! successfully, on first use, behind a [`OnceGate`]:
//!
//! - the first successful initialization wins and the value then lives as
//!   long as the cell (for a `static`, until the process exits);
//! - a thread reaching the cell while another is initializing it blocks
//!   until that finishes, and never sees a half-built value;
//! - a failed (or panicking) initializer leaves the cell empty and the next
//!   access tries again.
//!
//! ```rust
//! use axiom_locks::Lazy;
//! use std::collections::HashMap;
//!
//! static PORTS: Lazy<HashMap<&str, u16>> = Lazy::new(|| {
//!     HashMap::from([("http", 80), ("https", 443)])
//! });
//!
//! assert_eq!(PORTS["https"], 443);
//! ```

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::fmt;
use core::mem::{ManuallyDrop, MaybeUninit};
use core::ops::Deref;

use crate::OnceGate;

/// A cell written at most once.
pub struct OnceCell<T> {
    gate: OnceGate,
    value: UnsafeCell<MaybeUninit<T>>,
}

// SAFETY: the value is written once, inside the gate, before the gate is
// marked done with release ordering; afterwards it is only read. Sharing
// the cell shares `&T` (needs `Sync`) and lets any thread initialize or
// take the value (needs `Send`).
unsafe impl<T: Send + Sync> Sync for OnceCell<T> {}
unsafe impl<T: Send> Send for OnceCell<T> {}

impl<T> OnceCell<T> {
    /// Creates an empty cell.
    pub const fn new() -> Self {
        OnceCell {
            gate: OnceGate::new(),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }

    /// The value, if initialized. Never blocks.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        if self.gate.is_completed() {
            // SAFETY: completion is only published after the value is written.
            Some(unsafe { (*self.value.get()).assume_init_ref() })
        } else {
            None
        }
    }

    /// Mutable access to the value, if initialized.
    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        if self.gate.is_completed() {
            // SAFETY: as in `get`; `&mut self` rules out other readers.
            Some(unsafe { self.value.get_mut().assume_init_mut() })
        } else {
            None
        }
    }

    /// Stores `value` unless the cell is already initialized, in which case
    /// `value` is handed back.
    pub fn set(&self, value: T) -> Result<(), T> {
        let mut value = Some(value);
        let _ = self.get_or_try_init(|| value.take().ok_or(()));
        match value {
            None => Ok(()),
            Some(rejected) => Err(rejected),
        }
    }

    /// The value, initializing it with `init` if needed.
    pub fn get_or_init(&self, init: impl FnOnce() -> T) -> &T {
        match self.get_or_try_init(|| Ok::<T, Infallible>(init())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// The value, initializing it with `init` if needed.
    ///
    /// If `init` fails its error is returned, the cell stays empty and a
    /// later call will try again.
    pub fn get_or_try_init<E>(&self, init: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        self.gate.call_once(|| {
            let value = init()?;
            // SAFETY: the gate grants exclusive access until it is done.
            unsafe { (*self.value.get()).write(value) };
            Ok(())
        })?;
        // SAFETY: `call_once` returned `Ok`, so the gate is done and the
        // value was written.
        Ok(unsafe { (*self.value.get()).assume_init_ref() })
    }

    /// Consumes the cell, returning the value if initialized.
    pub fn into_inner(self) -> Option<T> {
        let mut this = ManuallyDrop::new(self);
        if this.gate.is_completed() {
            // SAFETY: initialized, and `this` is never dropped, so the
            // value is read out exactly once.
            Some(unsafe { this.value.get_mut().assume_init_read() })
        } else {
            None
        }
    }

    /// Takes the value out, leaving the cell uninitialized.
    pub fn take(&mut self) -> Option<T> {
        core::mem::replace(self, Self::new()).into_inner()
    }
}

impl<T> Default for OnceCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for OnceCell<T> {
    fn drop(&mut self) {
        if self.gate.is_completed() {
            // SAFETY: initialized and never read out by value.
            unsafe { self.value.get_mut().assume_init_drop() }
        }
    }
}

impl<T> From<T> for OnceCell<T> {
    fn from(value: T) -> Self {
        let cell = Self::new();
        let _ = cell.set(value);
        cell
    }
}

impl<T: fmt::Debug> fmt::Debug for OnceCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => f.debug_tuple("OnceCell").field(value).finish(),
            None => f.write_str("OnceCell(<uninit>)"),
        }
    }
}

/// A value computed on first access.
///
/// The initializer is kept (and must be `Fn`) so that an initializer that
/// panics can be run again by the next access.
pub struct Lazy<T, F = fn() -> T> {
    cell: OnceCell<T>,
    init: F,
}

impl<T, F: Fn() -> T> Lazy<T, F> {
    /// Creates a lazy value computed by `init` on first access.
    pub const fn new(init: F) -> Self {
        Lazy {
            cell: OnceCell::new(),
            init,
        }
    }

    /// Forces evaluation and returns the value.
    pub fn force(this: &Self) -> &T {
        this.cell.get_or_init(&this.init)
    }

    /// The value, if it has been computed. Never blocks.
    pub fn get(this: &Self) -> Option<&T> {
        this.cell.get()
    }
}

impl<T, F: Fn() -> T> Deref for Lazy<T, F> {
    type Target = T;

    fn deref(&self) -> &T {
        Lazy::force(self)
    }
}

impl<T: fmt::Debug, F> fmt::Debug for Lazy<T, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lazy").field("cell", &self.cell).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_set_then_get() {
        let cell = OnceCell::new();
        assert_eq!(cell.get(), None);
        assert_eq!(cell.set(5), Ok(()));
        assert_eq!(cell.set(6), Err(6));
        assert_eq!(cell.get(), Some(&5));
        assert_eq!(cell.into_inner(), Some(5));
    }

    #[test]
    fn test_get_or_init_runs_once_across_threads() {
        const THREADS: usize = 8;
        let cell = Arc::new(OnceCell::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let (cell, calls, barrier) =
                    (Arc::clone(&cell), Arc::clone(&calls), Arc::clone(&barrier));
                thread::spawn(move || {
                    barrier.wait();
                    *cell.get_or_init(|| {
                        calls.fetch_add(1, Relaxed);
                        vec![i; 3]
                    })
                    .first()
                    .unwrap()
                })
            })
            .collect();
        let seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Relaxed), 1);
        assert!(seen.windows(2).all(|w| w[0] == w[1]), "threads saw different values");
    }

    #[test]
    fn test_failed_init_is_retried() {
        let cell: OnceCell<String> = OnceCell::new();
        assert_eq!(cell.get_or_try_init(|| Err("not yet")), Err("not yet"));
        assert!(cell.get().is_none());
        let value = cell.get_or_try_init(|| Ok::<_, &str>("ready".to_string()));
        assert_eq!(value.map(String::as_str), Ok("ready"));
    }

    #[test]
    fn test_value_dropped_exactly_once() {
        let marker = Arc::new(());
        {
            let cell = OnceCell::new();
            cell.set(Arc::clone(&marker)).unwrap();
            assert_eq!(Arc::strong_count(&marker), 2);
        }
        assert_eq!(Arc::strong_count(&marker), 1);

        let mut cell = OnceCell::from(Arc::clone(&marker));
        let taken = cell.take();
        assert!(cell.get().is_none());
        drop(cell);
        assert_eq!(Arc::strong_count(&marker), 2);
        drop(taken);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_static_lazy() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        static TABLE: Lazy<Vec<u32>> = Lazy::new(|| {
            CALLS.fetch_add(1, Relaxed);
            (1..=4).collect()
        });

        assert!(Lazy::get(&TABLE).is_none());
        assert_eq!(TABLE.iter().sum::<u32>(), 10);
        assert_eq!(TABLE.len(), 4);
        assert_eq!(CALLS.load(Relaxed), 1);
    }

    #[test]
    fn test_panicking_lazy_retries() {
        let attempts = AtomicUsize::new(0);
        let lazy = Lazy::new(|| {
            if attempts.fetch_add(1, Relaxed) == 0 {
                panic!("first init fails");
            }
            7
        });
        assert!(catch_unwind(AssertUnwindSafe(|| *lazy)).is_err());
        assert_eq!(*lazy, 7);
        assert_eq!(attempts.load(Relaxed), 2);
    }
}
