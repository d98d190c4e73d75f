//! Two threads each add to a shared counter 100,000 times under a
//! [`Mutex`] built on `ExclusiveLock`. Without mutual exclusion increments
//! would be lost; with it the total is exactly 200,000.
//!
//! Run with `RUST_LOG=axiom_locks=trace` to see lock diagnostics.

use axiom_locks::{multi, ExclusiveLock, Mutex, WithLock};
use std::thread;
use tracing_subscriber::EnvFilter;

const THREADS: u64 = 2;
const INCREMENTS: u64 = 100_000;

// Shared counter protected by an owner-checked exclusive lock.
static COUNTER: Mutex<u64> = Mutex::new(0);

/// Increment the global counter [`INCREMENTS`] times.
fn add() {
    for _ in 0..INCREMENTS {
        COUNTER.with_lock(|n| *n += 1);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("Starting counter test...");

    let threads: Vec<_> = (0..THREADS).map(|_| thread::spawn(add)).collect();
    for t in threads {
        if t.join().is_err() {
            eprintln!("worker panicked");
            std::process::exit(1);
        }
    }

    let total = *COUNTER.lock();
    println!("Final counter value: {total}");
    assert_eq!(total, THREADS * INCREMENTS);

    // Two locks taken in opposite orders by two threads.
    let (a, b) = (ExclusiveLock::new(), ExclusiveLock::new());
    thread::scope(|s| {
        s.spawn(|| {
            for _ in 0..INCREMENTS {
                let _held = multi::acquire_pair(&a, &b).expect("distinct locks");
            }
        });
        s.spawn(|| {
            for _ in 0..INCREMENTS {
                let _held = multi::acquire_pair(&b, &a).expect("distinct locks");
            }
        });
    });
    println!("Opposite-order pair acquisition finished without deadlock");
}
