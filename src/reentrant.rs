//! # ReentrantLock
//!
//! An [`ExclusiveLock`] plus a depth counter. The owning thread may lock it
//! again without blocking on itself; each extra `lock` bumps the depth and
//! must be matched by an `unlock`. Only the `unlock` that brings the depth
//! back to zero releases the inner lock, and with it publishes the owner's
//! writes to the next thread.
//!
//! ```rust
//! use axiom_locks::{RawLock, ReentrantLock};
//!
//! let lock = ReentrantLock::new();
//! lock.lock().unwrap();
//! lock.lock().unwrap();
//! assert_eq!(lock.depth(), 2);
//! lock.unlock().unwrap();
//! lock.unlock().unwrap();
//! assert!(!lock.is_locked());
//! ```

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};
use std::time::Duration;

use crate::{ExclusiveLock, LockError, RawLock};

/// A mutual-exclusion lock its owner may acquire recursively.
#[derive(Debug, Default)]
pub struct ReentrantLock {
    inner: ExclusiveLock,
    // Only read or written by the thread holding `inner`.
    depth: AtomicUsize,
}

impl ReentrantLock {
    /// Creates a new, unlocked [`ReentrantLock`].
    #[inline(always)]
    pub const fn new() -> Self {
        ReentrantLock {
            inner: ExclusiveLock::new(),
            depth: AtomicUsize::new(0),
        }
    }

    /// How many times the calling thread currently holds the lock.
    ///
    /// Always `0` for a thread that is not the owner.
    pub fn depth(&self) -> usize {
        if self.inner.is_owned_by_current_thread() {
            self.depth.load(Relaxed)
        } else {
            0
        }
    }

    /// Re-enters the lock if the caller owns it.
    ///
    /// Returns `None` when the caller is not the owner.
    #[inline]
    fn reenter(&self) -> Option<Result<(), LockError>> {
        if !self.inner.is_owned_by_current_thread() {
            return None;
        }
        let depth = self.depth.load(Relaxed);
        Some(match depth.checked_add(1) {
            Some(next) => {
                self.depth.store(next, Relaxed);
                Ok(())
            }
            None => Err(LockError::ReentryViolation),
        })
    }

    /// Tries to acquire the lock, giving up once `timeout` has elapsed.
    ///
    /// The owner re-enters immediately.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        if let Some(res) = self.reenter() {
            return res.map(|()| true);
        }
        let acquired = self.inner.try_lock_for(timeout)?;
        if acquired {
            self.depth.store(1, Relaxed);
        }
        Ok(acquired)
    }
}

impl RawLock for ReentrantLock {
    fn lock(&self) -> Result<(), LockError> {
        if let Some(res) = self.reenter() {
            return res;
        }
        self.inner.lock()?;
        self.depth.store(1, Relaxed);
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        if let Some(res) = self.reenter() {
            return res.map(|()| true);
        }
        let acquired = self.inner.try_lock()?;
        if acquired {
            self.depth.store(1, Relaxed);
        }
        Ok(acquired)
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        ReentrantLock::try_lock_for(self, timeout)
    }

    fn unlock(&self) -> Result<(), LockError> {
        if !self.inner.is_owned_by_current_thread() {
            return Err(LockError::OwnershipViolation);
        }
        match self.depth.load(Relaxed) {
            // Owner with zero depth: the inner lock was taken behind our back.
            0 => Err(LockError::OwnershipViolation),
            1 => {
                self.depth.store(0, Relaxed);
                self.inner.unlock()
            }
            depth => {
                self.depth.store(depth - 1, Relaxed);
                Ok(())
            }
        }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    #[inline]
    fn is_owned_by_current_thread(&self) -> bool {
        self.inner.is_owned_by_current_thread()
    }
}

/// A data-carrying reentrant mutex: `lock_api`'s reentrancy layer over
/// [`ExclusiveLock`], keyed by the same thread ids.
///
/// Its guards only hand out shared references, since several may be alive
/// on the owning thread at once.
#[cfg(feature = "lock_api")]
pub type ReentrantMutex<T> =
    lock_api::ReentrantMutex<ExclusiveLock, crate::thread_id::LocalThreadId, T>;

/// Guard returned by [`ReentrantMutex::lock`](lock_api::ReentrantMutex::lock).
#[cfg(feature = "lock_api")]
pub type ReentrantMutexGuard<'a, T> =
    lock_api::ReentrantMutexGuard<'a, ExclusiveLock, crate::thread_id::LocalThreadId, T>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_depth_counts_nested_locks() {
        let lock = ReentrantLock::new();
        for expected in 1..=3 {
            lock.lock().unwrap();
            assert_eq!(lock.depth(), expected);
        }
        assert_eq!(lock.try_lock(), Ok(true));
        assert_eq!(lock.depth(), 4);
        for expected in (0..4).rev() {
            lock.unlock().unwrap();
            assert_eq!(lock.depth(), expected);
        }
        assert!(!lock.is_locked());
    }

    #[test]
    fn test_unbalanced_unlock_is_ownership_violation() {
        let lock = ReentrantLock::new();
        assert_eq!(lock.unlock(), Err(LockError::OwnershipViolation));
        lock.lock().unwrap();
        lock.unlock().unwrap();
        assert_eq!(lock.unlock(), Err(LockError::OwnershipViolation));
    }

    #[test]
    fn test_non_owner_cannot_unlock_or_enter() {
        let lock = Arc::new(ReentrantLock::new());
        lock.lock().unwrap();

        let other = Arc::clone(&lock);
        let (unlock_res, try_res) = thread::spawn(move || (other.unlock(), other.try_lock()))
            .join()
            .unwrap();
        assert_eq!(unlock_res, Err(LockError::OwnershipViolation));
        assert_eq!(try_res, Ok(false));
        assert_eq!(lock.depth(), 1);
        lock.unlock().unwrap();
    }

    #[test]
    fn test_held_until_last_unlock() {
        const K: usize = 5;
        let lock = Arc::new(ReentrantLock::new());
        for _ in 0..K {
            lock.lock().unwrap();
        }

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&lock);
        let waiter = thread::spawn(move || {
            other.lock().unwrap();
            tx.send(()).unwrap();
            other.unlock().unwrap();
        });

        for _ in 0..K - 1 {
            lock.unlock().unwrap();
            assert!(
                rx.recv_timeout(Duration::from_millis(20)).is_err(),
                "lock released before depth reached zero"
            );
        }
        lock.unlock().unwrap();
        rx.recv_timeout(Duration::from_secs(30))
            .expect("waiter never acquired the lock");
        waiter.join().unwrap();
    }

    #[test]
    fn test_try_lock_for_reenters_immediately() {
        let lock = ReentrantLock::new();
        assert_eq!(lock.try_lock_for(Duration::ZERO), Ok(true));
        assert_eq!(lock.try_lock_for(Duration::ZERO), Ok(true));
        assert_eq!(lock.depth(), 2);
        lock.unlock().unwrap();
        lock.unlock().unwrap();
    }

    #[test]
    fn test_unbounded_timeout_acquires() {
        let lock = ReentrantLock::new();
        assert_eq!(lock.try_lock_for(Duration::MAX), Ok(true));
        assert_eq!(lock.try_lock_for(Duration::MAX), Ok(true));
        assert_eq!(lock.depth(), 2);
        lock.unlock().unwrap();
        lock.unlock().unwrap();
        assert!(!lock.is_locked());
    }

    #[cfg(feature = "lock_api")]
    #[test]
    fn test_reentrant_mutex_nests_guards() {
        let m = ReentrantMutex::new(7);
        let outer = m.lock();
        let inner = m.lock();
        assert_eq!(*outer + *inner, 14);
    }
}
