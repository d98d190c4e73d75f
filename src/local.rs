//! # ThreadLocal
//!
//! Per-object thread-local storage: every thread that touches a
//! [`ThreadLocal`] gets its own instance of the value, created lazily on
//! that thread's first access. Unlike `thread_local!` the storage belongs to
//! the container, so it can live in a struct field, and every instance is
//! reachable again once the container is exclusively borrowed or consumed.
//!
//! Instances are boxed and never removed while the container is shared, so
//! a reference handed out by [`get_or`](ThreadLocal::get_or) stays valid for
//! as long as the container is borrowed. The thread-to-instance table is
//! guarded by a [`SharedLock`]; lookups take it in shared mode and only the
//! first access from a new thread takes it exclusively. No lock is held
//! while an initializer runs.
//!
//! ```rust
//! use axiom_locks::ThreadLocal;
//! use std::cell::Cell;
//! use std::thread;
//!
//! let hits: ThreadLocal<Cell<u32>> = ThreadLocal::new();
//! thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             for _ in 0..10 {
//!                 let local = hits.get_or(|| Cell::new(0));
//!                 local.set(local.get() + 1);
//!             }
//!         });
//!     }
//! });
//! assert_eq!(hits.into_values().map(Cell::into_inner).sum::<u32>(), 40);
//! ```

use core::cell::UnsafeCell;
use core::convert::Infallible;
use core::fmt;
use std::collections::HashMap;
use std::thread::{self, ThreadId};

use crate::error::contract_violation;
use crate::{ScopedGuard, SharedLock};

/// A set of per-thread values owned by one container.
pub struct ThreadLocal<T: Send> {
    lock: SharedLock,
    slots: UnsafeCell<HashMap<ThreadId, Box<T>>>,
}

// SAFETY: the table is only read under the shared lock and only written
// under the exclusive lock. Through `&self` a thread only ever reaches its
// own instance, so `T` never needs to be `Sync`; it must be `Send` because
// the instances are dropped (or handed out) by whichever thread owns the
// container at the end.
unsafe impl<T: Send> Sync for ThreadLocal<T> {}

impl<T: Send> ThreadLocal<T> {
    /// Creates an empty container.
    pub fn new() -> Self {
        ThreadLocal {
            lock: SharedLock::new(),
            slots: UnsafeCell::new(HashMap::new()),
        }
    }

    /// Creates an empty container with room for `threads` instances.
    pub fn with_capacity(threads: usize) -> Self {
        ThreadLocal {
            lock: SharedLock::new(),
            slots: UnsafeCell::new(HashMap::with_capacity(threads)),
        }
    }

    /// The calling thread's instance, if it has one.
    pub fn get(&self) -> Option<&T> {
        let id = thread::current().id();
        let view = self.lock.shared();
        let _guard = ScopedGuard::new(&view).unwrap_or_else(|err| contract_violation(err));
        // SAFETY: shared lock held; boxes are never freed while `self` is
        // borrowed, so the reference outlives the guard.
        let slots = unsafe { &*self.slots.get() };
        slots.get(&id).map(|slot| unsafe { &*(&**slot as *const T) })
    }

    /// The calling thread's instance, creating it with `create` on first
    /// access from this thread.
    pub fn get_or(&self, create: impl FnOnce() -> T) -> &T {
        match self.get_or_try(|| Ok::<T, Infallible>(create())) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }

    /// Like [`get_or`](Self::get_or) with a fallible initializer. On error
    /// nothing is stored and the next call tries again.
    pub fn get_or_try<E>(&self, create: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let value = Box::new(create()?);
        Ok(self.insert(value))
    }

    #[cold]
    fn insert(&self, value: Box<T>) -> &T {
        let id = thread::current().id();
        let _guard = ScopedGuard::new(&self.lock).unwrap_or_else(|err| contract_violation(err));
        // SAFETY: exclusive lock held. Other threads' boxes may move inside
        // the table but their heap allocations do not.
        let slots = unsafe { &mut *self.slots.get() };
        let threads = slots.len() + 1;
        let slot: *const T = &**slots.entry(id).or_insert(value);
        tracing::trace!(threads, "thread-local instance created");
        unsafe { &*slot }
    }

    /// Number of threads that have an instance.
    pub fn len(&mut self) -> usize {
        self.slots.get_mut().len()
    }

    /// Whether no thread has an instance yet.
    pub fn is_empty(&mut self) -> bool {
        self.slots.get_mut().is_empty()
    }

    /// Mutable access to every thread's instance, in no particular order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> + '_ {
        self.slots.get_mut().values_mut().map(|slot| &mut **slot)
    }

    /// Drops every instance, leaving the container empty.
    pub fn clear(&mut self) {
        self.slots.get_mut().clear();
    }

    /// Consumes the container, yielding every thread's instance.
    pub fn into_values(self) -> impl Iterator<Item = T> {
        self.slots.into_inner().into_values().map(|slot| *slot)
    }
}

impl<T: Send> Default for ThreadLocal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + fmt::Debug> fmt::Debug for ThreadLocal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocal")
            .field("local", &self.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::sync::atomic::{AtomicUsize, Ordering::Relaxed};
    use std::sync::{Arc, Barrier};

    #[test]
    fn test_each_thread_gets_its_own_instance() {
        const THREADS: usize = 6;
        let local: ThreadLocal<RefCell<Vec<usize>>> = ThreadLocal::new();
        let barrier = Barrier::new(THREADS);
        thread::scope(|s| {
            for t in 0..THREADS {
                let (local, barrier) = (&local, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    for i in 0..100 {
                        local.get_or(|| RefCell::new(Vec::new())).borrow_mut().push(t * 1000 + i);
                    }
                    let mine = local.get().unwrap().borrow();
                    assert_eq!(mine.len(), 100);
                    assert!(mine.iter().all(|v| v / 1000 == t), "saw another thread's values");
                });
            }
        });

        let mut local = local;
        assert_eq!(local.len(), THREADS);
        for values in local.iter_mut() {
            values.get_mut().clear();
        }
        assert!(local.into_values().all(|v| v.into_inner().is_empty()));
    }

    #[test]
    fn test_get_before_init_is_none() {
        let local: ThreadLocal<u8> = ThreadLocal::new();
        assert!(local.get().is_none());
        assert_eq!(*local.get_or(|| 3), 3);
        assert_eq!(*local.get_or(|| 9), 3, "initializer must run once per thread");
        assert_eq!(local.get(), Some(&3));
    }

    #[test]
    fn test_first_access_logs_and_stores() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let local: ThreadLocal<Vec<u8>> = ThreadLocal::with_capacity(2);
            thread::scope(|s| {
                s.spawn(|| assert_eq!(local.get_or(|| vec![1]).as_slice(), [1]));
            });
            assert_eq!(local.get_or(|| vec![2]).as_slice(), [2]);
            assert_eq!(local.get_or(|| vec![3]).as_slice(), [2]);
            let mut local = local;
            assert_eq!(local.len(), 2);
        });
    }

    #[test]
    fn test_failed_init_stores_nothing() {
        let local: ThreadLocal<String> = ThreadLocal::new();
        assert_eq!(local.get_or_try(|| Err(7)), Err(7));
        assert!(local.get().is_none());
        let value = local.get_or_try(|| Ok::<_, i32>("ok".into()));
        assert_eq!(value.map(String::as_str), Ok("ok"));
    }

    #[test]
    fn test_initializer_may_use_the_container() {
        let local: ThreadLocal<Cell<usize>> = ThreadLocal::new();
        let value = local.get_or(|| {
            assert!(local.get().is_none());
            Cell::new(1)
        });
        value.set(2);
        assert_eq!(local.get().map(Cell::get), Some(2));
    }

    #[test]
    fn test_values_dropped_with_container() {
        struct Tracked(Arc<AtomicUsize>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let local = ThreadLocal::new();
        thread::scope(|s| {
            for _ in 0..3 {
                s.spawn(|| {
                    local.get_or(|| Tracked(Arc::clone(&drops)));
                });
            }
        });
        // Instances outlive the threads that created them.
        assert_eq!(drops.load(Relaxed), 0);
        drop(local);
        assert_eq!(drops.load(Relaxed), 3);
    }
}
