//! # SpinLock
//!
//! The smallest lock in the crate: a single [`AtomicBool`] flipped with
//! test-and-set, spinning with [`BackOff`] while it is taken.
//!
//! Unlike [`ExclusiveLock`](crate::ExclusiveLock) it does not record which
//! thread holds it. That makes it one atomic store cheaper to release, but
//! the misuse checks are weaker:
//!
//! - Re-locking from the holding thread is **not** detected and spins
//!   forever.
//! - [`RawLock::unlock`] only rejects releasing a lock that is not held by
//!   anyone; it cannot tell the holder apart from another thread.
//! - [`RawLock::is_owned_by_current_thread`] is always `false`, so
//!   `ScopedGuard::adopt` and `FlexibleHandle::adopt` reject a `SpinLock`
//!   with [`LockError::OwnershipViolation`]. Lock through the guard or
//!   handle instead.
//!
//! Prefer it for very short critical sections whose correctness is obvious
//! at a glance. It is not fair: starvation is possible under contention.
//!
//! ## Example
//! ```rust
//! use axiom_locks::SpinMutex;
//!
//! static COUNTER: SpinMutex<u32> = SpinMutex::new(0);
//!
//! *COUNTER.lock() += 1;
//! assert_eq!(*COUNTER.lock(), 1);
//! ```

use core::sync::atomic::{
    AtomicBool,
    Ordering::{Acquire, Relaxed, Release},
};

use crate::{BackOff, LockError, RawLock};

/// A test-and-set spin lock without owner tracking.
#[derive(Debug)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Creates a new, unlocked [`SpinLock`].
    #[inline(always)]
    pub const fn new() -> Self {
        SpinLock {
            locked: AtomicBool::new(false),
        }
    }

    #[inline(always)]
    fn try_acquire(&self) -> bool {
        !self.locked.swap(true, Acquire)
    }

    /// Acquires the lock, spinning until it becomes available.
    #[inline]
    pub fn acquire(&self) {
        let backoff = BackOff::new();
        while !self.try_acquire() {
            // Wait on a plain load so contended waiters don't keep
            // invalidating the holder's cache line.
            backoff.spin_until(|| !self.locked.load(Relaxed));
        }
    }

    /// Tries to acquire the lock within a fixed number of attempts.
    #[inline]
    pub fn try_acquire_spins(&self, spins: usize) -> bool {
        let backoff = BackOff::new();
        for _ in 0..spins {
            if self.try_acquire() {
                return true;
            }
            backoff.wait();
        }
        false
    }

    /// Releases the lock without any check.
    ///
    /// # Safety
    /// The caller must be the thread that acquired the lock.
    #[inline]
    pub unsafe fn force_release(&self) {
        self.locked.store(false, Release);
    }
}

impl Default for SpinLock {
    fn default() -> Self {
        Self::new()
    }
}

impl RawLock for SpinLock {
    #[inline]
    fn lock(&self) -> Result<(), LockError> {
        self.acquire();
        Ok(())
    }

    #[inline]
    fn try_lock(&self) -> Result<bool, LockError> {
        Ok(self.try_acquire())
    }

    #[inline]
    fn unlock(&self) -> Result<(), LockError> {
        self.locked
            .compare_exchange(true, false, Release, Relaxed)
            .map(drop)
            .map_err(|_| LockError::OwnershipViolation)
    }

    #[inline(always)]
    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }

    /// Always `false`: the holder is not recorded, so no thread can prove
    /// it holds the lock. Adopting a `SpinLock` is therefore refused.
    #[inline(always)]
    fn is_owned_by_current_thread(&self) -> bool {
        false
    }
}

#[cfg(feature = "lock_api")]
unsafe impl lock_api::RawMutex for SpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = SpinLock::new();

    type GuardMarker = lock_api::GuardSend;

    #[inline]
    fn lock(&self) {
        self.acquire();
    }

    #[inline]
    fn try_lock(&self) -> bool {
        self.try_acquire()
    }

    #[inline]
    unsafe fn unlock(&self) {
        // SAFETY: lock_api only calls this for the guard's holder.
        unsafe { self.force_release() }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawLock::is_locked(self)
    }
}

/// A data-carrying mutex over [`SpinLock`].
#[cfg(feature = "lock_api")]
pub type SpinMutex<T> = lock_api::Mutex<SpinLock, T>;

/// Guard returned by [`SpinMutex::lock`](lock_api::Mutex::lock).
#[cfg(feature = "lock_api")]
pub type SpinMutexGuard<'a, T> = lock_api::MutexGuard<'a, SpinLock, T>;
