//! # ScopedGuard
//!
//! Holds one lock for exactly the lifetime of a lexical scope.
//!
//! The guard locks on construction (or adopts a lock the caller already
//! holds) and unlocks when dropped, on every way out of the scope: normal
//! return, `?`, or a panic unwinding through it. It offers no way to
//! release early, hand the lock to someone else or leave the thread; for
//! any of that use [`FlexibleHandle`](crate::FlexibleHandle).
//!
//! Everything executed while a guard is alive serializes every other user
//! of the lock. Keep guarded scopes down to the statements that touch the
//! protected state.
//!
//! ```rust
//! use axiom_locks::{ExclusiveLock, LockError, ScopedGuard};
//!
//! static LOG_LOCK: ExclusiveLock = ExclusiveLock::new();
//!
//! fn append() -> Result<(), LockError> {
//!     let _guard = ScopedGuard::new(&LOG_LOCK)?;
//!     // ... touch shared state ...
//!     Ok(())
//! }
//! append().unwrap();
//! ```

use core::fmt;
use core::marker::PhantomData;

use crate::error::contract_violation_in_drop;
use crate::{LockError, RawLock};

/// RAII ownership of one lock for a scope. See the [module docs](self).
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ScopedGuard<'a, L: RawLock + ?Sized> {
    lock: &'a L,
    // Ownership belongs to the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl<'a, L: RawLock + ?Sized> ScopedGuard<'a, L> {
    /// Locks `lock`, blocking until it is acquired.
    pub fn new(lock: &'a L) -> Result<Self, LockError> {
        lock.lock()?;
        Ok(Self::holding(lock))
    }

    /// Takes responsibility for releasing a lock the caller already holds.
    ///
    /// Returns [`LockError::OwnershipViolation`] if the calling thread does
    /// not hold `lock`, and always for locks that do not record their
    /// holder, such as [`SpinLock`](crate::SpinLock).
    pub fn adopt(lock: &'a L) -> Result<Self, LockError> {
        if !lock.is_owned_by_current_thread() {
            return Err(LockError::OwnershipViolation);
        }
        Ok(Self::holding(lock))
    }

    #[inline]
    fn holding(lock: &'a L) -> Self {
        ScopedGuard {
            lock,
            _not_send: PhantomData,
        }
    }

    /// The guarded lock.
    #[inline]
    pub fn lock_ref(&self) -> &'a L {
        self.lock
    }
}

impl<L: RawLock + ?Sized> Drop for ScopedGuard<'_, L> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.unlock() {
            contract_violation_in_drop(err);
        }
    }
}

impl<L: RawLock + ?Sized> fmt::Debug for ScopedGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedGuard")
            .field("lock", &(self.lock as *const L as *const ()))
            .finish()
    }
}

/// Runs `f` while holding `lock`.
///
/// The lock is released when `f` returns or unwinds.
pub fn scoped<L, R>(lock: &L, f: impl FnOnce() -> R) -> Result<R, LockError>
where
    L: RawLock + ?Sized,
{
    let _guard = ScopedGuard::new(lock)?;
    Ok(f())
}
