//! # Multi-lock acquisition
//!
//! Acquires several locks at once without assuming any global order
//! between them, so two callers naming the same locks in opposite orders
//! cannot deadlock each other.
//!
//! Each round blocks on one lock, then only *tries* the others. If any of
//! them is busy, everything taken in the round is released, the next round
//! blocks on the lock that was busy, and the caller backs off. A thread
//! therefore never waits while holding another lock from the set, which
//! rules out the hold-and-wait cycle a deadlock needs.
//!
//! Acquisition is all-or-nothing: a call returns either with every lock
//! held or with none of them held. Contention is absorbed internally and
//! never reported; only contract violations from a constituent lock (for
//! example the same non-reentrant lock listed twice) come back as errors.
//!
//! ```rust
//! use axiom_locks::{multi, ExclusiveLock};
//!
//! struct Account {
//!     lock: ExclusiveLock,
//! }
//!
//! fn transfer(from: &Account, to: &Account) {
//!     // Callers may pass the pair in either order.
//!     let (_from, _to) = multi::acquire_pair(&from.lock, &to.lock).unwrap();
//!     // ... move funds ...
//! }
//!
//! let (a, b) = (Account { lock: ExclusiveLock::new() }, Account { lock: ExclusiveLock::new() });
//! transfer(&a, &b);
//! transfer(&b, &a);
//! ```

use crate::{BackOff, FlexibleHandle, LockError, RawLock};

/// Releases the first `count` locks of a round started at `first`, newest
/// first.
fn release_round<L: RawLock + ?Sized>(
    locks: &[&L],
    first: usize,
    count: usize,
) -> Result<(), LockError> {
    let n = locks.len();
    let mut result = Ok(());
    for k in (0..count).rev() {
        if let Err(err) = locks[(first + k) % n].unlock() {
            result = result.and(Err(err));
        }
    }
    result
}

/// One attempt at the whole set, blocking on `locks[first]` only when
/// `block` is set.
///
/// Returns the offset (from `first`) of the lock that was busy, with every
/// lock of the round released again.
fn round<L: RawLock + ?Sized>(
    locks: &[&L],
    first: usize,
    block: bool,
) -> Result<Option<usize>, LockError> {
    let n = locks.len();
    if block {
        locks[first].lock()?;
    } else if !locks[first].try_lock()? {
        return Ok(Some(0));
    }

    for offset in 1..n {
        match locks[(first + offset) % n].try_lock() {
            Ok(true) => {}
            Ok(false) => {
                release_round(locks, first, offset)?;
                return Ok(Some(offset));
            }
            Err(err) => {
                // The violation is the error worth reporting.
                let _ = release_round(locks, first, offset);
                return Err(err);
            }
        }
    }
    Ok(None)
}

/// Blocks until every lock in `locks` is held by the calling thread.
///
/// On success the caller owns every lock and must release each of them,
/// usually by using [`acquire_all`] instead, which hands back owning
/// handles. On error no lock from `locks` is held.
pub fn lock_all<L: RawLock + ?Sized>(locks: &[&L]) -> Result<(), LockError> {
    match locks {
        [] => return Ok(()),
        [only] => return only.lock(),
        _ => {}
    }

    let backoff = BackOff::new();
    let mut first = 0;
    let mut attempt = 1_u64;
    while let Some(busy) = round(locks, first, true)? {
        first = (first + busy) % locks.len();
        tracing::trace!(attempt, next_first = first, "multi-lock round found a busy lock");
        attempt += 1;
        backoff.wait();
    }
    Ok(())
}

/// Locks two locks of possibly different types without deadlock.
pub fn lock_pair<A: RawLock, B: RawLock>(a: &A, b: &B) -> Result<(), LockError> {
    let set: [&dyn RawLock; 2] = [a, b];
    lock_all(&set)
}

/// Makes one non-blocking attempt at taking every lock in `locks`.
///
/// Returns `Ok(None)` when all of them were acquired, or `Ok(Some(i))`
/// naming the first busy lock, in which case none are held.
pub fn try_lock_all<L: RawLock + ?Sized>(locks: &[&L]) -> Result<Option<usize>, LockError> {
    if locks.is_empty() {
        return Ok(None);
    }
    round(locks, 0, false)
}

/// Like [`lock_all`], returning one owning [`FlexibleHandle`] per lock, in
/// the order given.
pub fn acquire_all<'a, L: RawLock + ?Sized>(
    locks: &[&'a L],
) -> Result<Vec<FlexibleHandle<'a, L>>, LockError> {
    lock_all(locks)?;
    Ok(locks
        .iter()
        .map(|&lock| FlexibleHandle::assume_owned(lock))
        .collect())
}

/// Like [`lock_pair`], returning an owning handle for each lock.
pub fn acquire_pair<'a, 'b, A: RawLock, B: RawLock>(
    a: &'a A,
    b: &'b B,
) -> Result<(FlexibleHandle<'a, A>, FlexibleHandle<'b, B>), LockError> {
    lock_pair(a, b)?;
    Ok((
        FlexibleHandle::assume_owned(a),
        FlexibleHandle::assume_owned(b),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ExclusiveLock, ReentrantLock, SharedLock, SpinLock};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn test_lock_all_acquires_every_lock() {
        let locks = [ExclusiveLock::new(), ExclusiveLock::new(), ExclusiveLock::new()];
        let refs: Vec<&ExclusiveLock> = locks.iter().collect();
        lock_all(&refs).unwrap();
        assert!(locks.iter().all(|l| l.is_owned_by_current_thread()));
        for l in &locks {
            l.unlock().unwrap();
        }
    }

    #[test]
    fn test_degenerate_sets() {
        let none: [&ExclusiveLock; 0] = [];
        lock_all(&none).unwrap();

        let lock = ExclusiveLock::new();
        lock_all(&[&lock]).unwrap();
        assert!(lock.is_owned_by_current_thread());
        lock.unlock().unwrap();
    }

    #[test]
    fn test_mixed_lock_types() {
        let exclusive = ExclusiveLock::new();
        let reentrant = ReentrantLock::new();
        let shared = SharedLock::new();
        let spin = SpinLock::new();
        let set: [&dyn RawLock; 4] = [&exclusive, &reentrant, &shared, &spin];
        let handles = acquire_all(&set).unwrap();
        assert!(handles.iter().all(FlexibleHandle::owns_lock));
        assert!(shared.is_locked_exclusive());
        drop(handles);
        assert!(set.iter().all(|l| !l.is_locked()));
    }

    #[test]
    fn test_duplicate_lock_is_reported_and_nothing_stays_held() {
        let a = ExclusiveLock::new();
        let b = ExclusiveLock::new();
        assert_eq!(lock_all(&[&a, &b, &a]), Err(LockError::ReentryViolation));
        assert!(!a.is_locked());
        assert!(!b.is_locked());
    }

    #[test]
    fn test_busy_lock_releases_partial_acquisition() {
        let a = Arc::new(ExclusiveLock::new());
        let b = Arc::new(ExclusiveLock::new());
        b.lock().unwrap();

        let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
        let outcome = thread::spawn(move || {
            let res = try_lock_all(&[&*a2, &*b2]);
            (res, a2.is_locked())
        })
        .join()
        .unwrap();
        assert_eq!(outcome, (Ok(Some(1)), false));
        b.unlock().unwrap();
    }

    #[test]
    fn test_waits_for_contended_lock() {
        let a = Arc::new(ExclusiveLock::new());
        let b = Arc::new(ExclusiveLock::new());
        b.lock().unwrap();

        let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
        let waiter = thread::spawn(move || {
            let (ha, hb) = acquire_pair(&*a2, &*b2).unwrap();
            assert!(ha.owns_lock() && hb.owns_lock());
        });
        thread::sleep(std::time::Duration::from_millis(10));
        // While `b` is busy the waiter must not sit on `a`.
        assert!(a.try_lock_for(std::time::Duration::from_secs(30)).unwrap());
        a.unlock().unwrap();
        b.unlock().unwrap();
        waiter.join().unwrap();
        assert!(!a.is_locked() && !b.is_locked());
    }

    #[test]
    fn test_opposite_orders_do_not_deadlock() {
        const ROUNDS: usize = 2_000;
        let a = Arc::new(ExclusiveLock::new());
        let b = Arc::new(ExclusiveLock::new());
        let barrier = Arc::new(Barrier::new(2));

        let spawn = |first: Arc<ExclusiveLock>, second: Arc<ExclusiveLock>| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS {
                    let (_x, _y) = acquire_pair(&*first, &*second).unwrap();
                }
            })
        };
        let t1 = spawn(Arc::clone(&a), Arc::clone(&b));
        let t2 = spawn(Arc::clone(&b), Arc::clone(&a));
        t1.join().unwrap();
        t2.join().unwrap();
        assert!(!a.is_locked() && !b.is_locked());
    }
}
