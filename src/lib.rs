//! # axiom-locks 🔐
//!
//! Ownership-checked **mutual-exclusion primitives** for threads that share
//! data: exclusive, reentrant and reader-writer locks, scoped and flexible
//! lock handles, deadlock-free acquisition of several locks at once, and
//! one-time initialization.
//!
//! The crate includes:
//!
//! - [`ExclusiveLock`]: a non-reentrant lock that records its owner.
//! - [`ReentrantLock`]: a lock its owner may re-acquire, counted by depth.
//! - [`SharedLock`]: a reader-writer lock with per-mode misuse checks.
//! - [`SpinLock`]: a bare test-and-set lock with no owner tracking.
//! - [`ScopedGuard`] / [`FlexibleHandle`]: RAII holders of any [`RawLock`].
//! - [`multi`]: all-or-nothing acquisition of a set of locks.
//! - [`OnceGate`], [`OnceCell`], [`Lazy`]: initialization that runs once on
//!   success and is retried after a failure.
//! - [`ThreadLocal`]: per-object, per-thread values.
//! - [`BackOff`]: the adaptive exponential backoff every blocking wait uses.
//!
//! ## ✨ Features
//!
//! - ✅ Misuse is reported, not undefined: re-locking a held non-reentrant
//!   lock gives [`LockError::ReentryViolation`] instead of a deadlock, and
//!   releasing a lock the caller does not hold gives
//!   [`LockError::OwnershipViolation`].
//! - 🧩 `lock_api` (default): data-carrying [`Mutex`], [`RwLock`],
//!   [`ReentrantMutex`] and [`SpinMutex`] built on the raw locks. These
//!   adapters turn contract violations into panics.
//! - ⚙️ `std` (default): waits escalate from spinning to
//!   `std::thread::yield_now()` under prolonged contention.
//!
//! ## 🚀 Quick Example
//!
//! ```rust
//! use axiom_locks::{ExclusiveLock, LockError, Mutex, RawLock};
//!
//! // Data-carrying mutex.
//! let counter = Mutex::new(0);
//! *counter.lock() += 1;
//! assert_eq!(*counter.lock(), 1);
//!
//! // Raw lock with checked misuse.
//! let lock = ExclusiveLock::new();
//! lock.lock()?;
//! assert_eq!(lock.lock(), Err(LockError::ReentryViolation));
//! lock.unlock()?;
//! assert_eq!(lock.unlock(), Err(LockError::OwnershipViolation));
//! # Ok::<(), LockError>(())
//! ```
//!
//! ## 🧠 Design
//!
//! Every lock is a small set of atomics. Acquisition is a compare-exchange
//! with **Acquire** ordering and release a store or exchange with
//! **Release** ordering, so everything the previous holder wrote is visible
//! to the next. Blocked threads wait with [`BackOff`] rather than parking.
//!
//! Thread identity comes from [`thread_id::current`], a per-thread id that
//! is never reused, which is what lets [`ExclusiveLock`] and
//! [`ReentrantLock`] tell their owner apart from everyone else.
//!
//! ## ⚠️ Safety & Usage Notes
//!
//! - Contract violations are detected at runtime, never assumed away.
//! - There is no poisoning: a panic while holding a guard releases the lock.
//! - [`SharedLock`] does not prevent writer starvation.
//! - Locks must outlive every guard and handle created from them; the
//!   borrow checker enforces this.
//!
//! ## 📦 Modules
//!
//! - [`backoff`]: adaptive exponential backoff.
//! - [`error`]: the [`LockError`] type and violation escalation.
//! - [`raw`]: the [`RawLock`] trait.
//! - [`spinlock`], [`exclusive`], [`reentrant`], [`shared`]: the locks.
//! - [`guard`], [`handle`]: lock holders.
//! - [`multi`]: multi-lock acquisition.
//! - [`once`], [`lazy`]: one-time initialization.
//! - [`local`]: per-object thread-local storage.
//! - [`thread_id`]: thread identity.

pub mod backoff;
pub mod error;
pub mod exclusive;
pub mod guard;
pub mod handle;
pub mod lazy;
pub mod local;
pub mod multi;
pub mod once;
pub mod raw;
pub mod reentrant;
pub mod shared;
pub mod spinlock;
pub mod thread_id;

pub use backoff::BackOff;
pub use error::LockError;
pub use exclusive::ExclusiveLock;
pub use guard::{scoped, ScopedGuard};
pub use handle::FlexibleHandle;
pub use lazy::{Lazy, OnceCell};
pub use local::ThreadLocal;
pub use once::{OnceGate, OnceState};
pub use raw::RawLock;
pub use reentrant::ReentrantLock;
pub use shared::{SharedLock, SharedMode};
pub use spinlock::SpinLock;

#[cfg(feature = "lock_api")]
pub use exclusive::{Mutex, MutexGuard, WithLock};
#[cfg(feature = "lock_api")]
pub use reentrant::{ReentrantMutex, ReentrantMutexGuard};
#[cfg(feature = "lock_api")]
pub use shared::{RwLock, RwLockReadGuard, RwLockWriteGuard};
#[cfg(feature = "lock_api")]
pub use spinlock::{SpinMutex, SpinMutexGuard};
