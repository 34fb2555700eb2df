//! Atomic counters for tracker observability.
//!
//! All counters use relaxed ordering. They are advisory/diagnostic, not
//! synchronization primitives. Each debug context owns its own set.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-context tracker operation counters.
#[derive(Debug)]
pub struct TrackerMetrics {
    /// Successful registrations.
    pub registers: AtomicU64,
    /// Registrations rejected because the id was already open.
    pub duplicate_registers: AtomicU64,
    /// Successful closes.
    pub closes: AtomicU64,
    /// Closes of ids that were not open (double close, never registered).
    pub invalid_closes: AtomicU64,
    /// Total dereference validations.
    pub validations: AtomicU64,
    /// Uses of a quarantined handle.
    pub use_after_close: AtomicU64,
    /// Uses of an id that is neither open nor quarantined.
    pub unknown_handles: AtomicU64,
    /// Reports delivered to an installed callback.
    pub reports_delivered: AtomicU64,
    /// Callback invocations that returned an error.
    pub callback_failures: AtomicU64,
    /// Quarantined handles discarded for exceeding capacity.
    pub evictions: AtomicU64,
    /// Referent releases that panicked during teardown.
    pub release_failures: AtomicU64,
}

impl TrackerMetrics {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registers: AtomicU64::new(0),
            duplicate_registers: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            invalid_closes: AtomicU64::new(0),
            validations: AtomicU64::new(0),
            use_after_close: AtomicU64::new(0),
            unknown_handles: AtomicU64::new(0),
            reports_delivered: AtomicU64::new(0),
            callback_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            release_failures: AtomicU64::new(0),
        }
    }

    /// Increment a counter by 1.
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment a counter by `n`.
    pub fn add(counter: &AtomicU64, n: u64) {
        if n != 0 {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Read a counter value.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registers: Self::get(&self.registers),
            duplicate_registers: Self::get(&self.duplicate_registers),
            closes: Self::get(&self.closes),
            invalid_closes: Self::get(&self.invalid_closes),
            validations: Self::get(&self.validations),
            use_after_close: Self::get(&self.use_after_close),
            unknown_handles: Self::get(&self.unknown_handles),
            reports_delivered: Self::get(&self.reports_delivered),
            callback_failures: Self::get(&self.callback_failures),
            evictions: Self::get(&self.evictions),
            release_failures: Self::get(&self.release_failures),
        }
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all tracker counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub registers: u64,
    pub duplicate_registers: u64,
    pub closes: u64,
    pub invalid_closes: u64,
    pub validations: u64,
    pub use_after_close: u64,
    pub unknown_handles: u64,
    pub reports_delivered: u64,
    pub callback_failures: u64,
    pub evictions: u64,
    pub release_failures: u64,
}

impl MetricsSnapshot {
    /// Invalid-handle events of any kind.
    #[must_use]
    pub fn invalid_uses(&self) -> u64 {
        self.use_after_close + self.unknown_handles
    }
}
