//! Atomics shim.
//!
//! Builds against `loom` when compiled with `--cfg loom` so the model checker
//! can explore the free-list and ready-queue interleavings.

#[cfg(loom)]
pub(crate) use loom::sync::atomic::{fence, AtomicPtr, AtomicU64, AtomicU8, Ordering};

#[cfg(not(loom))]
pub(crate) use std::sync::atomic::{fence, AtomicPtr, AtomicU64, AtomicU8, Ordering};

/// Pause between CAS retries
#[cfg(not(loom))]
pub(crate) struct RetryBackoff(crossbeam::utils::Backoff);

#[cfg(not(loom))]
impl RetryBackoff {
    pub(crate) fn new() -> Self {
        Self(crossbeam::utils::Backoff::new())
    }

    #[inline]
    pub(crate) fn snooze(&self) {
        self.0.snooze();
    }
}

#[cfg(loom)]
pub(crate) struct RetryBackoff;

#[cfg(loom)]
impl RetryBackoff {
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) fn snooze(&self) {
        loom::thread::yield_now();
    }
}

/// Records payload reads and writes so loom can flag unsynchronized access.
/// Compiles to nothing outside of loom.
#[cfg(loom)]
pub(crate) struct AccessTracker(loom::cell::UnsafeCell<()>);

#[cfg(loom)]
impl AccessTracker {
    pub(crate) fn new() -> Self {
        Self(loom::cell::UnsafeCell::new(()))
    }

    pub(crate) fn read(&self) {
        self.0.with(|_| ());
    }

    pub(crate) fn write(&self) {
        self.0.with_mut(|_| ());
    }
}

#[cfg(not(loom))]
pub(crate) struct AccessTracker;

#[cfg(not(loom))]
impl AccessTracker {
    pub(crate) fn new() -> Self {
        Self
    }

    #[inline(always)]
    pub(crate) fn read(&self) {}

    #[inline(always)]
    pub(crate) fn write(&self) {}
}
