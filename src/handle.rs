//! # FlexibleHandle
//!
//! A movable lock handle: a reference to a lock plus a flag recording
//! whether the handle currently owns it.
//!
//! Unlike [`ScopedGuard`](crate::ScopedGuard) a handle can be created
//! without locking (`deferred`), can lock and unlock any number of times
//! during its life, and can be returned from a function to hand an already
//! acquired lock to the caller. Whatever happens, the lock is released at
//! most once: dropping the handle unlocks only if it still owns the lock.
//!
//! ```rust
//! use axiom_locks::{ExclusiveLock, FlexibleHandle, LockError};
//!
//! fn prepare(lock: &ExclusiveLock) -> Result<FlexibleHandle<'_, ExclusiveLock>, LockError> {
//!     let handle = FlexibleHandle::new(lock)?;
//!     // ... set up state under the lock ...
//!     Ok(handle)
//! }
//!
//! let lock = ExclusiveLock::new();
//! let mut handle = prepare(&lock).unwrap();
//! assert!(handle.owns_lock());
//! handle.unlock().unwrap(); // release before the scope ends
//! ```

use core::fmt;
use core::marker::PhantomData;
use core::mem;
use std::time::Duration;

use crate::error::contract_violation_in_drop;
use crate::{LockError, RawLock};

/// A move-only handle that may or may not own its lock.
#[must_use = "an owning handle releases its lock as soon as it is dropped"]
pub struct FlexibleHandle<'a, L: RawLock + ?Sized> {
    lock: Option<&'a L>,
    owns: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: RawLock + ?Sized> FlexibleHandle<'a, L> {
    #[inline]
    fn from_parts(lock: Option<&'a L>, owns: bool) -> Self {
        FlexibleHandle {
            lock,
            owns,
            _not_send: PhantomData,
        }
    }

    /// Locks `lock` and returns a handle owning it.
    pub fn new(lock: &'a L) -> Result<Self, LockError> {
        lock.lock()?;
        Ok(Self::from_parts(Some(lock), true))
    }

    /// Associates `lock` without locking it.
    #[inline]
    pub fn deferred(lock: &'a L) -> Self {
        Self::from_parts(Some(lock), false)
    }

    /// Makes one non-blocking attempt at locking `lock`.
    ///
    /// The handle is associated either way; check
    /// [`owns_lock`](Self::owns_lock) for the outcome.
    pub fn try_new(lock: &'a L) -> Result<Self, LockError> {
        let owns = lock.try_lock()?;
        Ok(Self::from_parts(Some(lock), owns))
    }

    /// Takes over a lock the caller already holds.
    ///
    /// Returns [`LockError::OwnershipViolation`] if the calling thread does
    /// not hold `lock`, and always for locks that do not record their
    /// holder, such as [`SpinLock`](crate::SpinLock).
    pub fn adopt(lock: &'a L) -> Result<Self, LockError> {
        if !lock.is_owned_by_current_thread() {
            return Err(LockError::OwnershipViolation);
        }
        Ok(Self::from_parts(Some(lock), true))
    }

    /// Wraps a lock the caller has just acquired, without checking.
    #[inline]
    pub(crate) fn assume_owned(lock: &'a L) -> Self {
        Self::from_parts(Some(lock), true)
    }

    /// A handle with no lock. Every lock operation on it fails with
    /// [`LockError::OwnershipViolation`].
    #[inline]
    pub fn empty() -> Self {
        Self::from_parts(None, false)
    }

    #[inline]
    fn associated(&self) -> Result<&'a L, LockError> {
        self.lock.ok_or(LockError::OwnershipViolation)
    }

    #[inline]
    fn lockable(&self) -> Result<&'a L, LockError> {
        let lock = self.associated()?;
        if self.owns {
            return Err(LockError::ReentryViolation);
        }
        Ok(lock)
    }

    /// Blocks until the associated lock is acquired.
    ///
    /// Returns [`LockError::ReentryViolation`] if the handle already owns it.
    pub fn lock(&mut self) -> Result<(), LockError> {
        self.lockable()?.lock()?;
        self.owns = true;
        Ok(())
    }

    /// Attempts to acquire the associated lock without blocking.
    pub fn try_lock(&mut self) -> Result<bool, LockError> {
        self.owns = self.lockable()?.try_lock()?;
        Ok(self.owns)
    }

    /// Attempts to acquire the associated lock within `timeout`.
    pub fn try_lock_for(&mut self, timeout: Duration) -> Result<bool, LockError> {
        self.owns = self.lockable()?.try_lock_for(timeout)?;
        Ok(self.owns)
    }

    /// Releases the associated lock.
    ///
    /// Returns [`LockError::OwnershipViolation`] if the handle does not own
    /// it.
    pub fn unlock(&mut self) -> Result<(), LockError> {
        let lock = self.associated()?;
        if !self.owns {
            return Err(LockError::OwnershipViolation);
        }
        lock.unlock()?;
        self.owns = false;
        Ok(())
    }

    /// Disassociates the lock without unlocking it.
    ///
    /// If the handle owned the lock, releasing it is now the caller's job.
    #[inline]
    pub fn release(&mut self) -> Option<&'a L> {
        self.owns = false;
        self.lock.take()
    }

    /// Moves the handle's state out, leaving this handle empty.
    ///
    /// Dropping the emptied handle afterwards does nothing.
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::empty())
    }

    /// Exchanges the state of two handles.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Whether the handle currently owns its lock.
    #[inline]
    pub fn owns_lock(&self) -> bool {
        self.owns
    }

    /// The associated lock, if any.
    #[inline]
    pub fn lock_ref(&self) -> Option<&'a L> {
        self.lock
    }
}

impl<L: RawLock + ?Sized> Default for FlexibleHandle<'_, L> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<L: RawLock + ?Sized> Drop for FlexibleHandle<'_, L> {
    fn drop(&mut self) {
        if !self.owns {
            return;
        }
        if let Some(lock) = self.lock {
            if let Err(err) = lock.unlock() {
                contract_violation_in_drop(err);
            }
        }
    }
}

impl<L: RawLock + ?Sized> fmt::Debug for FlexibleHandle<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlexibleHandle")
            .field("lock", &self.lock.map(|l| l as *const L as *const ()))
            .field("owns", &self.owns)
            .finish()
    }
}
