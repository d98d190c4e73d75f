//! Per-thread identity used for lock ownership checks.
//!
//! Every thread that touches a lock is lazily assigned a process-unique,
//! non-zero id from a global counter. Ids are never reused, so a lock left
//! held by a thread that exited can never be mistaken for one held by a
//! newer thread.

use core::cell::Cell;
use core::num::NonZeroUsize;
use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    // Const-initialized and without a destructor, so it stays readable while
    // other thread-locals are being torn down.
    static THREAD_ID: Cell<usize> = const { Cell::new(0) };
}

/// Returns the calling thread's id.
#[inline]
pub fn current() -> NonZeroUsize {
    let id = THREAD_ID.with(|slot| {
        let id = slot.get();
        if id != 0 {
            return id;
        }
        let id = NEXT_ID.fetch_add(1, Relaxed);
        slot.set(id);
        id
    });
    // The counter starts at 1; wrapping would need usize::MAX threads.
    NonZeroUsize::new(id).unwrap_or(NonZeroUsize::MIN)
}

/// [`lock_api::GetThreadId`] source backed by [`current`].
///
/// Lets `lock_api::ReentrantMutex` be built over the crate's raw locks with
/// the same notion of thread identity the locks themselves use.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalThreadId;

#[cfg(feature = "lock_api")]
unsafe impl lock_api::GetThreadId for LocalThreadId {
    const INIT: Self = LocalThreadId;

    fn nonzero_thread_id(&self) -> NonZeroUsize {
        current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn test_id_is_stable_within_a_thread() {
        assert_eq!(current(), current());
    }

    #[test]
    fn test_ids_differ_across_threads() {
        let mut ids: HashSet<_> = (0..8)
            .map(|_| thread::spawn(current))
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();
        ids.insert(current());
        assert_eq!(ids.len(), 9);
    }
}
