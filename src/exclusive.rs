//! # ExclusiveLock
//!
//! The basic mutual-exclusion primitive. Its whole state is one atomic word
//! holding the id of the owning thread, `0` while unlocked. Claiming the lock
//! is a `0 → id` compare-exchange with `Acquire` ordering and releasing it is
//! an `id → 0` compare-exchange with `Release` ordering, so every write made
//! by one holder is visible to the next.
//!
//! Because the owner is recorded, misuse is caught instead of silently
//! deadlocking or corrupting the lock:
//!
//! - locking again from the owning thread returns
//!   [`LockError::ReentryViolation`];
//! - unlocking from any thread but the owner returns
//!   [`LockError::OwnershipViolation`].
//!
//! Waiters spin with [`BackOff`] and yield to the OS under contention. No
//! ordering between waiters is promised.
//!
//! ## Protecting data
//! [`Mutex<T>`] pairs the lock with the data it protects. Guards and
//! [`WithLock::with_lock`] are the only ways to reach the data, and the
//! borrow checker keeps references from outliving them. Smuggling a
//! reference out (for example through a raw pointer handed to a callback)
//! voids every guarantee here and is the caller's responsibility.
//!
//! ```rust
//! use axiom_locks::{Mutex, WithLock};
//!
//! let balance = Mutex::new(100_u64);
//! balance.with_lock(|b| *b -= 30);
//! assert_eq!(*balance.lock(), 70);
//! ```

use core::num::NonZeroUsize;
use core::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use std::time::{Duration, Instant};

use crate::{thread_id, BackOff, LockError, RawLock};

const UNLOCKED: usize = 0;

/// A non-reentrant, owner-checked mutual-exclusion lock.
///
/// The lock's identity is its address; it is shared by reference and never
/// cloned. Dropping it while held is a contract violation and is logged.
#[derive(Debug)]
pub struct ExclusiveLock {
    owner: AtomicUsize,
}

impl ExclusiveLock {
    /// Creates a new, unlocked [`ExclusiveLock`].
    #[inline(always)]
    pub const fn new() -> Self {
        ExclusiveLock {
            owner: AtomicUsize::new(UNLOCKED),
        }
    }

    /// The id of the thread holding the lock, if any.
    ///
    /// Diagnostic only: the answer may be stale by the time it is read.
    #[inline]
    pub fn owner(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.owner.load(Relaxed))
    }

    #[inline(always)]
    fn claim(&self, me: usize) -> bool {
        self.owner
            .compare_exchange_weak(UNLOCKED, me, Acquire, Relaxed)
            .is_ok()
    }

    #[inline]
    fn check_reentry(&self, me: usize) -> Result<(), LockError> {
        if self.owner.load(Relaxed) == me {
            return Err(LockError::ReentryViolation);
        }
        Ok(())
    }

    /// Tries to acquire the lock, giving up once `timeout` has elapsed.
    ///
    /// Returns `Ok(false)` on timeout. A zero timeout still makes one
    /// attempt; one too large to express as a deadline waits without limit.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.try_lock_until(deadline),
            None => RawLock::lock(self).map(|()| true),
        }
    }

    /// Tries to acquire the lock, giving up once `deadline` has passed.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<bool, LockError> {
        let me = thread_id::current().get();
        self.check_reentry(me)?;
        Ok(BackOff::new().spin_until_deadline(deadline, || {
            self.owner.load(Relaxed) == UNLOCKED && self.claim(me)
        }))
    }
}

impl Default for ExclusiveLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExclusiveLock {
    fn drop(&mut self) {
        if let Some(owner) = NonZeroUsize::new(*self.owner.get_mut()) {
            tracing::error!(owner = owner.get(), "exclusive lock dropped while held");
        }
    }
}

impl RawLock for ExclusiveLock {
    fn lock(&self) -> Result<(), LockError> {
        let me = thread_id::current().get();
        if self.claim(me) {
            return Ok(());
        }
        self.check_reentry(me)?;
        BackOff::new().spin_until(|| self.owner.load(Relaxed) == UNLOCKED && self.claim(me));
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        let me = thread_id::current().get();
        self.check_reentry(me)?;
        Ok(self
            .owner
            .compare_exchange(UNLOCKED, me, Acquire, Relaxed)
            .is_ok())
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        ExclusiveLock::try_lock_for(self, timeout)
    }

    fn unlock(&self) -> Result<(), LockError> {
        let me = thread_id::current().get();
        self.owner
            .compare_exchange(me, UNLOCKED, Release, Relaxed)
            .map(drop)
            .map_err(|_| LockError::OwnershipViolation)
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.owner.load(Relaxed) != UNLOCKED
    }

    #[inline]
    fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Relaxed) == thread_id::current().get()
    }
}

#[cfg(feature = "lock_api")]
unsafe impl lock_api::RawMutex for ExclusiveLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = ExclusiveLock::new();

    // Ownership is tied to the locking thread.
    type GuardMarker = lock_api::GuardNoSend;

    #[track_caller]
    fn lock(&self) {
        if let Err(err) = RawLock::lock(self) {
            crate::error::contract_violation(err);
        }
    }

    #[track_caller]
    fn try_lock(&self) -> bool {
        RawLock::try_lock(self).unwrap_or_else(|err| crate::error::contract_violation(err))
    }

    #[track_caller]
    unsafe fn unlock(&self) {
        if let Err(err) = RawLock::unlock(self) {
            crate::error::contract_violation_in_drop(err);
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        RawLock::is_locked(self)
    }
}

#[cfg(feature = "lock_api")]
unsafe impl lock_api::RawMutexTimed for ExclusiveLock {
    type Duration = Duration;
    type Instant = Instant;

    #[track_caller]
    fn try_lock_for(&self, timeout: Duration) -> bool {
        ExclusiveLock::try_lock_for(self, timeout)
            .unwrap_or_else(|err| crate::error::contract_violation(err))
    }

    #[track_caller]
    fn try_lock_until(&self, deadline: Instant) -> bool {
        ExclusiveLock::try_lock_until(self, deadline)
            .unwrap_or_else(|err| crate::error::contract_violation(err))
    }
}

/// A data-carrying mutex over [`ExclusiveLock`].
#[cfg(feature = "lock_api")]
pub type Mutex<T> = lock_api::Mutex<ExclusiveLock, T>;

/// Guard returned by [`Mutex::lock`](lock_api::Mutex::lock).
#[cfg(feature = "lock_api")]
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, ExclusiveLock, T>;

/// Scoped access to lock-protected data.
///
/// The closure receives a borrow that cannot escape it; the lock is released
/// when the closure returns or unwinds.
#[cfg(feature = "lock_api")]
pub trait WithLock<T: ?Sized> {
    /// Runs `f` with exclusive access to the protected value.
    fn with_lock<R>(&self, f: impl FnOnce(&mut T) -> R) -> R;
}

#[cfg(feature = "lock_api")]
impl<R: lock_api::RawMutex, T: ?Sized> WithLock<T> for lock_api::Mutex<R, T> {
    #[inline]
    fn with_lock<U>(&self, f: impl FnOnce(&mut T) -> U) -> U {
        let mut guard = self.lock();
        f(&mut *guard)
    }
}
