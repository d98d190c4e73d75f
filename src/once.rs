//! # OnceGate
//!
//! Runs an initialization action exactly once **on success**.
//!
//! The gate is an [`ExclusiveLock`] plus a three-state flag
//! (`Idle → Running → Done`). The first caller to take the lock runs the
//! action while every other caller blocks on the lock. When the action
//! succeeds the gate becomes `Done` and every later or waiting caller
//! returns immediately, with everything the action wrote visible to it.
//!
//! When the action fails, by returning `Err` or by panicking, the gate
//! goes back to `Idle`. The error is handed to the caller that ran the
//! action and to no one else, and the next caller (possibly one that was
//! already waiting) runs the action again. A failed initialization is
//! retried rather than poisoning the gate.
//!
//! ```rust
//! use axiom_locks::OnceGate;
//!
//! static INIT: OnceGate = OnceGate::new();
//!
//! let mut attempts = 0;
//! let first = INIT.call_once(|| {
//!     attempts += 1;
//!     Err("disk not ready")
//! });
//! assert_eq!(first, Err("disk not ready"));
//! assert!(!INIT.is_completed());
//!
//! INIT.call_once(|| {
//!     attempts += 1;
//!     Ok::<(), &str>(())
//! })
//! .unwrap();
//! assert!(INIT.is_completed());
//! assert_eq!(attempts, 2);
//! ```

use core::convert::Infallible;
use core::sync::atomic::{
    AtomicU8,
    Ordering::{Acquire, Relaxed, Release},
};

use crate::error::contract_violation;
use crate::{ExclusiveLock, ScopedGuard};

const IDLE: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;

/// Observable state of a [`OnceGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnceState {
    /// The action has not succeeded yet and is not running.
    Idle,
    /// A caller is running the action.
    Running,
    /// The action has succeeded; the gate is a no-op from now on.
    Done,
}

/// A one-time-initialization gate. See the [module docs](self).
#[derive(Debug, Default)]
pub struct OnceGate {
    lock: ExclusiveLock,
    state: AtomicU8,
}

/// Publishes the outcome of a run when dropped, so a panicking action
/// still returns the gate to idle.
struct Running<'a> {
    state: &'a AtomicU8,
    outcome: u8,
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        if self.outcome == IDLE && std::thread::panicking() {
            tracing::warn!("once action panicked; gate reset to idle");
        }
        self.state.store(self.outcome, Release);
    }
}

impl OnceGate {
    /// Creates a gate that has not run yet.
    #[inline(always)]
    pub const fn new() -> Self {
        OnceGate {
            lock: ExclusiveLock::new(),
            state: AtomicU8::new(IDLE),
        }
    }

    /// Runs `action` unless a previous run succeeded.
    ///
    /// Blocks while another caller is running the action. Returns `Ok(())`
    /// if the gate is (or becomes) done without this caller's action
    /// running, and returns `action`'s own error if it ran and failed.
    ///
    /// # Panics
    /// Calling `call_once` on the same gate from inside `action` is a
    /// contract violation and panics instead of deadlocking.
    #[track_caller]
    pub fn call_once<E>(&self, action: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        if self.is_completed() {
            return Ok(());
        }
        self.call_once_slow(action)
    }

    #[cold]
    #[track_caller]
    fn call_once_slow<E>(&self, action: impl FnOnce() -> Result<(), E>) -> Result<(), E> {
        let _guard = ScopedGuard::new(&self.lock).unwrap_or_else(|err| contract_violation(err));
        if self.state.load(Acquire) == DONE {
            return Ok(());
        }

        self.state.store(RUNNING, Relaxed);
        let mut running = Running {
            state: &self.state,
            outcome: IDLE,
        };
        let result = action();
        match &result {
            Ok(()) => running.outcome = DONE,
            Err(_) => tracing::debug!("once action failed; gate reset to idle"),
        }
        result
    }

    /// Runs an action that cannot fail, unless the gate is already done.
    #[track_caller]
    pub fn call_once_infallible(&self, action: impl FnOnce()) {
        let result = self.call_once(|| {
            action();
            Ok::<(), Infallible>(())
        });
        match result {
            Ok(()) => {}
            Err(never) => match never {},
        }
    }

    /// Whether an action has completed successfully.
    ///
    /// A `true` result synchronizes with that action: its effects are
    /// visible to the caller.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.load(Acquire) == DONE
    }

    /// The gate's current state.
    pub fn state(&self) -> OnceState {
        match self.state.load(Acquire) {
            IDLE => OnceState::Idle,
            RUNNING => OnceState::Running,
            _ => OnceState::Done,
        }
    }
}
