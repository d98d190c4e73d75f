//! # SharedLock
//!
//! A reader-writer lock. Any number of threads may hold it in shared mode at
//! once; exclusive mode excludes every reader and every other writer.
//!
//! The state is a single atomic word: `0` when unlocked, `usize::MAX` while a
//! writer holds it, otherwise the number of readers. The writer's thread id
//! is recorded next to it, and every thread keeps a small registry of the
//! shared locks it holds, so misuse is reported in both modes:
//!
//! - re-locking in either mode while already holding the lock in either
//!   mode returns [`LockError::ReentryViolation`] (it would deadlock, or in
//!   the shared-to-shared case could deadlock behind a waiting writer);
//! - releasing a mode the caller does not hold returns
//!   [`LockError::OwnershipViolation`].
//!
//! ## Fairness
//! There is none. A writer waits until it observes the lock fully
//! unlocked, and readers keep entering while the count is non-zero, so a
//! steady stream of overlapping readers can starve writers indefinitely.
//! Workloads that need writer progress must bound their read sections.
//!
//! ```rust
//! use axiom_locks::RwLock;
//!
//! let config = RwLock::new(String::from("v1"));
//! std::thread::scope(|s| {
//!     // Two readers on different threads may hold it at once.
//!     let a = s.spawn(|| config.read().len());
//!     let b = s.spawn(|| config.read().len());
//!     assert_eq!(a.join().unwrap(), b.join().unwrap());
//! });
//! config.write().push_str("-patched");
//! assert_eq!(*config.read(), "v1-patched");
//! ```
//!
//! Unlike `std::sync::RwLock`, a thread must not take a second read guard
//! while it still holds one: the nested `read()` panics with a contract
//! violation instead of risking a deadlock behind a waiting writer.

use core::cell::RefCell;
use core::sync::atomic::{
    AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use std::time::{Duration, Instant};

use crate::{thread_id, BackOff, LockError, RawLock};

const UNLOCKED: usize = 0;
/// State value while a writer holds the lock.
const WRITER: usize = usize::MAX;
const MAX_READERS: usize = WRITER - 1;
const NO_WRITER: usize = 0;

/// Source of [`SharedLock`] registry keys. Keys are never reused, so a
/// stale registration can never match a lock created later.
static NEXT_LOCK_KEY: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static HELD_SHARED: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

// The registry can be gone while thread-locals are torn down. From then on
// shared holds on that thread are simply not tracked.
fn holds_shared(key: usize) -> bool {
    HELD_SHARED
        .try_with(|held| held.borrow().contains(&key))
        .unwrap_or(false)
}

fn register_shared(key: usize) {
    let _ = HELD_SHARED.try_with(|held| held.borrow_mut().push(key));
}

/// Removes one registration of `key`; `None` if the registry is gone.
fn unregister_shared(key: usize) -> Option<bool> {
    HELD_SHARED
        .try_with(|held| {
            let mut held = held.borrow_mut();
            match held.iter().rposition(|&k| k == key) {
                Some(pos) => {
                    held.swap_remove(pos);
                    true
                }
                None => false,
            }
        })
        .ok()
}

/// Drops every registration of `key` on the calling thread.
fn forget_shared(key: usize) {
    let _ = HELD_SHARED.try_with(|held| held.borrow_mut().retain(|&k| k != key));
}

/// An owner-checked reader-writer lock. See the [module docs](self).
///
/// Dropping it while held is a contract violation and is logged.
#[derive(Debug)]
pub struct SharedLock {
    state: AtomicUsize,
    writer: AtomicUsize,
    // Registry key, assigned on first use; `0` until then.
    key: AtomicUsize,
}

impl SharedLock {
    /// Creates a new, unlocked [`SharedLock`].
    #[inline(always)]
    pub const fn new() -> Self {
        SharedLock {
            state: AtomicUsize::new(UNLOCKED),
            writer: AtomicUsize::new(NO_WRITER),
            key: AtomicUsize::new(0),
        }
    }

    /// This lock's key in the per-thread registry of shared holds.
    #[inline]
    fn key(&self) -> usize {
        match self.key.load(Relaxed) {
            0 => {
                let fresh = NEXT_LOCK_KEY.fetch_add(1, Relaxed);
                match self.key.compare_exchange(0, fresh, Relaxed, Relaxed) {
                    Ok(_) => fresh,
                    Err(assigned) => assigned,
                }
            }
            key => key,
        }
    }

    /// Rejects any acquisition by a thread already holding the lock.
    fn check_reentry(&self, me: usize) -> Result<(), LockError> {
        if self.writer.load(Relaxed) == me || holds_shared(self.key()) {
            return Err(LockError::ReentryViolation);
        }
        Ok(())
    }

    #[inline]
    fn try_claim_exclusive(&self, me: usize) -> bool {
        let claimed = self
            .state
            .compare_exchange(UNLOCKED, WRITER, Acquire, Relaxed)
            .is_ok();
        if claimed {
            self.writer.store(me, Relaxed);
        }
        claimed
    }

    /// One non-blocking attempt at adding a reader. Retries only while other
    /// readers race on the count, never while a writer holds the lock.
    #[inline]
    fn try_claim_shared(&self) -> bool {
        let mut state = self.state.load(Relaxed);
        while state < MAX_READERS {
            match self
                .state
                .compare_exchange_weak(state, state + 1, Acquire, Relaxed)
            {
                Ok(_) => {
                    register_shared(self.key());
                    return true;
                }
                Err(actual) => state = actual,
            }
        }
        false
    }

    /// Acquires the lock in shared mode, blocking while a writer holds it.
    pub fn lock_shared(&self) -> Result<(), LockError> {
        self.check_reentry(thread_id::current().get())?;
        BackOff::new().spin_until(|| self.try_claim_shared());
        Ok(())
    }

    /// Attempts to acquire the lock in shared mode without blocking.
    pub fn try_lock_shared(&self) -> Result<bool, LockError> {
        self.check_reentry(thread_id::current().get())?;
        Ok(self.try_claim_shared())
    }

    /// Attempts to acquire the lock in shared mode within `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without limit.
    pub fn try_lock_shared_for(&self, timeout: Duration) -> Result<bool, LockError> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.try_lock_shared_until(deadline),
            None => self.lock_shared().map(|()| true),
        }
    }

    /// Attempts to acquire the lock in shared mode before `deadline`.
    pub fn try_lock_shared_until(&self, deadline: Instant) -> Result<bool, LockError> {
        self.check_reentry(thread_id::current().get())?;
        Ok(BackOff::new().spin_until_deadline(deadline, || self.try_claim_shared()))
    }

    /// Releases one shared hold of the calling thread.
    pub fn unlock_shared(&self) -> Result<(), LockError> {
        match unregister_shared(self.key()) {
            Some(true) => {}
            Some(false) => return Err(LockError::OwnershipViolation),
            // Untracked: at least make sure some reader exists.
            None => {
                let state = self.state.load(Relaxed);
                if state == UNLOCKED || state == WRITER {
                    return Err(LockError::OwnershipViolation);
                }
            }
        }
        self.state.fetch_sub(1, Release);
        Ok(())
    }

    /// Attempts to acquire the lock in exclusive mode within `timeout`.
    ///
    /// A timeout too large to express as a deadline waits without limit.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.try_lock_until(deadline),
            None => RawLock::lock(self).map(|()| true),
        }
    }

    /// Attempts to acquire the lock in exclusive mode before `deadline`.
    pub fn try_lock_until(&self, deadline: Instant) -> Result<bool, LockError> {
        let me = thread_id::current().get();
        self.check_reentry(me)?;
        Ok(BackOff::new().spin_until_deadline(deadline, || {
            self.state.load(Relaxed) == UNLOCKED && self.try_claim_exclusive(me)
        }))
    }

    /// Number of threads holding the lock in shared mode.
    pub fn reader_count(&self) -> usize {
        match self.state.load(Relaxed) {
            WRITER => 0,
            readers => readers,
        }
    }

    /// Whether a writer currently holds the lock.
    pub fn is_locked_exclusive(&self) -> bool {
        self.state.load(Relaxed) == WRITER
    }

    /// Whether the calling thread holds the lock in shared mode.
    pub fn is_shared_by_current_thread(&self) -> bool {
        holds_shared(self.key())
    }

    /// A view of the shared (reader) path as a [`RawLock`].
    ///
    /// Lets [`ScopedGuard`](crate::ScopedGuard) and
    /// [`FlexibleHandle`](crate::FlexibleHandle) hold reader locks.
    #[inline]
    pub fn shared(&self) -> SharedMode<'_> {
        SharedMode { lock: self }
    }
}

impl Default for SharedLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SharedLock {
    fn drop(&mut self) {
        match *self.state.get_mut() {
            UNLOCKED => {}
            WRITER => tracing::error!(
                writer = *self.writer.get_mut(),
                "shared lock dropped while held exclusively"
            ),
            readers => tracing::error!(readers, "shared lock dropped while held shared"),
        }
        let key = *self.key.get_mut();
        if key != 0 {
            forget_shared(key);
        }
    }
}

impl RawLock for SharedLock {
    fn lock(&self) -> Result<(), LockError> {
        let me = thread_id::current().get();
        self.check_reentry(me)?;
        BackOff::new()
            .spin_until(|| self.state.load(Relaxed) == UNLOCKED && self.try_claim_exclusive(me));
        Ok(())
    }

    fn try_lock(&self) -> Result<bool, LockError> {
        let me = thread_id::current().get();
        self.check_reentry(me)?;
        Ok(self.try_claim_exclusive(me))
    }

    fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        SharedLock::try_lock_for(self, timeout)
    }

    fn unlock(&self) -> Result<(), LockError> {
        let me = thread_id::current().get();
        if self.writer.load(Relaxed) != me {
            return Err(LockError::OwnershipViolation);
        }
        self.writer.store(NO_WRITER, Relaxed);
        self.state.store(UNLOCKED, Release);
        Ok(())
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != UNLOCKED
    }

    /// Whether the calling thread holds the lock in exclusive mode.
    #[inline]
    fn is_owned_by_current_thread(&self) -> bool {
        self.writer.load(Relaxed) == thread_id::current().get()
    }
}

/// The shared path of a [`SharedLock`] seen as a [`RawLock`].
#[derive(Debug, Clone, Copy)]
pub struct SharedMode<'a> {
    lock: &'a SharedLock,
}

impl RawLock for SharedMode<'_> {
    #[inline]
    fn lock(&self) -> Result<(), LockError> {
        self.lock.lock_shared()
    }

    #[inline]
    fn try_lock(&self) -> Result<bool, LockError> {
        self.lock.try_lock_shared()
    }

    #[inline]
    fn try_lock_for(&self, timeout: Duration) -> Result<bool, LockError> {
        self.lock.try_lock_shared_for(timeout)
    }

    #[inline]
    fn unlock(&self) -> Result<(), LockError> {
        self.lock.unlock_shared()
    }

    #[inline]
    fn is_locked(&self) -> bool {
        self.lock.reader_count() > 0
    }

    #[inline]
    fn is_owned_by_current_thread(&self) -> bool {
        self.lock.is_shared_by_current_thread()
    }
}

#[cfg(feature = "lock_api")]
mod lock_api_impl {
    use super::*;
    use crate::error::{contract_violation, contract_violation_in_drop};

    unsafe impl lock_api::RawRwLock for SharedLock {
        #[allow(clippy::declare_interior_mutable_const)]
        const INIT: Self = SharedLock::new();

        type GuardMarker = lock_api::GuardNoSend;

        #[track_caller]
        fn lock_shared(&self) {
            if let Err(err) = SharedLock::lock_shared(self) {
                contract_violation(err);
            }
        }

        #[track_caller]
        fn try_lock_shared(&self) -> bool {
            SharedLock::try_lock_shared(self).unwrap_or_else(|err| contract_violation(err))
        }

        #[track_caller]
        unsafe fn unlock_shared(&self) {
            if let Err(err) = SharedLock::unlock_shared(self) {
                contract_violation_in_drop(err);
            }
        }

        #[track_caller]
        fn lock_exclusive(&self) {
            if let Err(err) = RawLock::lock(self) {
                contract_violation(err);
            }
        }

        #[track_caller]
        fn try_lock_exclusive(&self) -> bool {
            RawLock::try_lock(self).unwrap_or_else(|err| contract_violation(err))
        }

        #[track_caller]
        unsafe fn unlock_exclusive(&self) {
            if let Err(err) = RawLock::unlock(self) {
                contract_violation_in_drop(err);
            }
        }

        #[inline]
        fn is_locked(&self) -> bool {
            RawLock::is_locked(self)
        }

        #[inline]
        fn is_locked_exclusive(&self) -> bool {
            SharedLock::is_locked_exclusive(self)
        }
    }

    unsafe impl lock_api::RawRwLockTimed for SharedLock {
        type Duration = Duration;
        type Instant = Instant;

        #[track_caller]
        fn try_lock_shared_for(&self, timeout: Duration) -> bool {
            SharedLock::try_lock_shared_for(self, timeout)
                .unwrap_or_else(|err| contract_violation(err))
        }

        #[track_caller]
        fn try_lock_shared_until(&self, deadline: Instant) -> bool {
            SharedLock::try_lock_shared_until(self, deadline)
                .unwrap_or_else(|err| contract_violation(err))
        }

        #[track_caller]
        fn try_lock_exclusive_for(&self, timeout: Duration) -> bool {
            SharedLock::try_lock_for(self, timeout).unwrap_or_else(|err| contract_violation(err))
        }

        #[track_caller]
        fn try_lock_exclusive_until(&self, deadline: Instant) -> bool {
            SharedLock::try_lock_until(self, deadline)
                .unwrap_or_else(|err| contract_violation(err))
        }
    }
}

/// A data-carrying reader-writer lock over [`SharedLock`].
#[cfg(feature = "lock_api")]
pub type RwLock<T> = lock_api::RwLock<SharedLock, T>;

/// Guard returned by [`RwLock::read`](lock_api::RwLock::read).
#[cfg(feature = "lock_api")]
pub type RwLockReadGuard<'a, T> = lock_api::RwLockReadGuard<'a, SharedLock, T>;

/// Guard returned by [`RwLock::write`](lock_api::RwLock::write).
#[cfg(feature = "lock_api")]
pub type RwLockWriteGuard<'a, T> = lock_api::RwLockWriteGuard<'a, SharedLock, T>;
