//! Contract-violation errors reported by the locks.

use thiserror::Error;

/// A misuse of a lock by its caller.
///
/// Both variants indicate a logic bug rather than a transient condition:
/// they are never retried internally. The checked API (`RawLock`, the
/// handles) returns them; APIs that cannot return an error (the `lock_api`
/// trait impls, `Drop`) escalate them through [`contract_violation`].
///
/// Failures of a user action passed to
/// [`OnceGate::call_once`](crate::OnceGate::call_once) are not represented
/// here: the action's own error type is handed back unchanged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockError {
    /// The caller already holds the lock and tried to take it again, which
    /// would deadlock on a non-reentrant lock.
    #[error("resource deadlock would occur: lock is already held by this owner")]
    ReentryViolation,
    /// The caller tried to release a lock it does not hold.
    #[error("operation not permitted: lock is not held by this owner")]
    OwnershipViolation,
}

/// Aborts the current operation on a contract violation.
///
/// Logs at `error` level, then panics. Used wherever a violation cannot be
/// returned to the caller.
#[cold]
#[track_caller]
pub fn contract_violation(err: LockError) -> ! {
    let location = core::panic::Location::caller();
    tracing::error!(error = %err, %location, "lock contract violated");
    panic!("lock contract violated: {err}");
}

/// Like [`contract_violation`], but only logs when the thread is already
/// unwinding, so a violation found during cleanup does not abort the
/// process with a double panic.
#[track_caller]
pub(crate) fn contract_violation_in_drop(err: LockError) {
    if std::thread::panicking() {
        let location = core::panic::Location::caller();
        tracing::error!(error = %err, %location, "lock contract violated while unwinding");
    } else {
        contract_violation(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_violation() {
        assert!(LockError::ReentryViolation.to_string().contains("deadlock"));
        assert!(LockError::OwnershipViolation.to_string().contains("not held"));
    }

    #[test]
    #[should_panic(expected = "lock contract violated")]
    fn test_contract_violation_panics() {
        contract_violation(LockError::OwnershipViolation);
    }
}
