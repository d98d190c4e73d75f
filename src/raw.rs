//! The lock capability shared by every primitive in the crate.

use std::time::{Duration, Instant};

use crate::{BackOff, LockError};

/// A lock that can be acquired and released by the calling thread.
///
/// This is the seam [`ScopedGuard`](crate::ScopedGuard),
/// [`FlexibleHandle`](crate::FlexibleHandle) and
/// [`lock_all`](crate::multi::lock_all) are written against. The trait is
/// object safe so locks of different types can be acquired together through
/// `&dyn RawLock`.
///
/// Every implementation tracks enough about its holder to reject misuse at
/// runtime, which is why [`unlock`](RawLock::unlock) is a safe method.
///
/// A successful `lock`/`try_lock` synchronizes-with the `unlock` that
/// released the lock before it: everything written by the previous holder
/// is visible to the new one.
pub trait RawLock {
    /// Blocks until the lock is acquired by the calling thread.
    ///
    /// Returns [`LockError::ReentryViolation`] if acquiring would deadlock on
    /// a lock the caller already holds.
    fn lock(&self) -> Result<(), LockError>;

    /// Attempts to acquire the lock without blocking.
    ///
    /// `Ok(false)` means another holder has it.
    fn try_lock(&self) -> Result<bool, LockError>;

    /// Attempts to acquire the lock, giving up once `timeout` has elapsed.
    ///
    /// The default polls [`try_lock`](RawLock::try_lock) with backoff. A
    /// timeout too large to express as a deadline never expires.
    fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        let deadline = Instant::now().checked_add(timeout);
        let backoff = BackOff::new();
        loop {
            if self.try_lock()? {
                return Ok(true);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(false);
            }
            backoff.wait();
        }
    }

    /// Releases the lock.
    ///
    /// Returns [`LockError::OwnershipViolation`] if the caller does not
    /// hold it.
    fn unlock(&self) -> Result<(), LockError>;

    /// Whether any thread currently holds the lock.
    fn is_locked(&self) -> bool;

    /// Whether the calling thread currently holds the lock.
    ///
    /// Locks that do not record their holder answer `false`.
    fn is_owned_by_current_thread(&self) -> bool;
}

impl<L: RawLock + ?Sized> RawLock for &L {
    #[inline]
    fn lock(&self) -> Result<(), LockError> {
        (**self).lock()
    }

    #[inline]
    fn try_lock(&self) -> Result<bool, LockError> {
        (**self).try_lock()
    }

    #[inline]
    fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        (**self).try_lock_for(timeout)
    }

    #[inline]
    fn unlock(&self) -> Result<(), LockError> {
        (**self).unlock()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        (**self).is_locked()
    }

    #[inline]
    fn is_owned_by_current_thread(&self) -> bool {
        (**self).is_owned_by_current_thread()
    }
}
