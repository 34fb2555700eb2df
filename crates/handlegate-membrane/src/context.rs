//! Debug context: the owner of all tracker state.
//!
//! One [`DebugContext`] exists per debug-mode session of the embedding
//! runtime. It is created with the session and torn down with it; there is
//! no process-wide tracker. Every mutation takes `&mut self`, so the
//! embedding runtime's existing execution lock is the only synchronization.
//!
//! The ABI layer drives it:
//! - `register` on handle creation
//! - `close` on handle close
//! - `validate` before every dereference
//!
//! and diagnostic tooling reads it through the `get_*` query surface.

use crate::builder::{BuilderTracker, InvalidBuilderUse};
use crate::config::{DebugConfig, clamp_capacity};
use crate::detector::{InvalidHandleDetector, InvalidHandleUse, Operation, ValidationResult};
use crate::error::{CallbackError, TrackerError};
use crate::generation::{Generation, GenerationCounter};
use crate::handle::{Handle, HandleId, HandleRecord};
use crate::metrics::{MetricsSnapshot, TrackerMetrics};
use crate::quarantine::{ClosedHandleQuarantine, Eviction};
use crate::registry::HandleRegistry;

/// Result of routing a close event through the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The handle moved to the quarantine. `evicted` lists handles pushed
    /// out of the quarantine by this close, oldest first; the ABI layer may
    /// recycle their ids.
    Closed {
        record: HandleRecord,
        evicted: Vec<HandleRecord>,
    },
    /// The id was not open. Already reported as an invalid handle.
    Rejected(ValidationResult),
}

impl CloseOutcome {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed { .. })
    }

    /// Records evicted as a side effect of this close.
    #[must_use]
    pub fn evicted(&self) -> &[HandleRecord] {
        match self {
            Self::Closed { evicted, .. } => evicted,
            Self::Rejected(_) => &[],
        }
    }
}

/// What teardown released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeardownSummary {
    pub open_released: usize,
    pub quarantined_released: usize,
    /// Referents whose drop panicked. Teardown carries on regardless.
    pub release_failures: usize,
}

/// Handle tracker state scoped to one debug session.
#[derive(Debug)]
pub struct DebugContext<T> {
    generations: GenerationCounter,
    registry: HandleRegistry<T>,
    quarantine: ClosedHandleQuarantine<T>,
    detector: InvalidHandleDetector,
    builders: BuilderTracker,
    metrics: TrackerMetrics,
}

impl<T> DebugContext<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(&DebugConfig::default())
    }

    #[must_use]
    pub fn with_config(config: &DebugConfig) -> Self {
        let capacity = config.closed_handles_queue_max_size;
        Self {
            generations: GenerationCounter::new(),
            registry: HandleRegistry::new(),
            quarantine: ClosedHandleQuarantine::new(capacity),
            detector: InvalidHandleDetector::new(),
            builders: BuilderTracker::new(capacity),
            metrics: TrackerMetrics::new(),
        }
    }

    // -- lifecycle events --------------------------------------------------

    /// Track a handle the ABI layer just created.
    ///
    /// A duplicate id is a bug in the ABI layer and is returned as
    /// [`TrackerError::DuplicateHandle`]; it is never routed to the callback.
    pub fn register(&mut self, id: HandleId, referent: T) -> Result<HandleRecord, TrackerError> {
        let generation = self.generations.current();
        match self.registry.register(id, referent, generation) {
            Ok(handle) => {
                TrackerMetrics::inc(&self.metrics.registers);
                Ok(handle.record())
            }
            Err(err) => {
                TrackerMetrics::inc(&self.metrics.duplicate_registers);
                Err(err)
            }
        }
    }

    /// Move an open handle to the quarantine.
    ///
    /// Closing an id that is not open (double close, or never registered) is
    /// an invalid handle use: it is classified, reported through the
    /// callback, and returned as [`CloseOutcome::Rejected`]. Only a failing
    /// callback produces an `Err`.
    pub fn close(&mut self, id: HandleId) -> Result<CloseOutcome, TrackerError> {
        match self.registry.close(id) {
            Ok(handle) => {
                let record = handle.record();
                let eviction = self.quarantine.push(handle);
                TrackerMetrics::inc(&self.metrics.closes);
                let evicted = self.count_eviction(eviction);
                Ok(CloseOutcome::Closed { record, evicted })
            }
            Err(TrackerError::UnknownHandle { .. }) => {
                TrackerMetrics::inc(&self.metrics.invalid_closes);
                let result = self.detector.validate(
                    id,
                    Operation::Close,
                    &self.registry,
                    &self.quarantine,
                    &self.metrics,
                )?;
                Ok(CloseOutcome::Rejected(result))
            }
            Err(other) => Err(other),
        }
    }

    /// Classify a handle before dereference, reporting invalid uses.
    pub fn validate(&mut self, id: HandleId) -> Result<ValidationResult, TrackerError> {
        TrackerMetrics::inc(&self.metrics.validations);
        self.detector.validate(
            id,
            Operation::Dereference,
            &self.registry,
            &self.quarantine,
            &self.metrics,
        )
    }

    /// Classify without reporting or counting.
    #[must_use]
    pub fn classify(&self, id: HandleId) -> ValidationResult {
        InvalidHandleDetector::classify(id, &self.registry, &self.quarantine).0
    }

    /// Referent of an open handle. No validation or reporting.
    #[must_use]
    pub fn referent(&self, id: HandleId) -> Option<&T> {
        self.registry.get(id).map(Handle::referent)
    }

    /// Open handle for `id`, if any.
    #[must_use]
    pub fn open_handle(&self, id: HandleId) -> Option<&Handle<T>> {
        self.registry.get(id)
    }

    // -- query surface -----------------------------------------------------

    pub fn new_generation(&mut self) -> Generation {
        self.generations.new_generation()
    }

    #[must_use]
    pub fn current_generation(&self) -> Generation {
        self.generations.current()
    }

    /// Open handles created at or after `generation`, in creation order.
    #[must_use]
    pub fn get_open_handles(&self, generation: Generation) -> Vec<&Handle<T>> {
        self.registry.open_handles_since(generation)
    }

    /// Quarantined handles, oldest first.
    #[must_use]
    pub fn get_closed_handles(&self) -> Vec<&Handle<T>> {
        self.quarantine.snapshot()
    }

    #[must_use]
    pub fn get_closed_handles_queue_max_size(&self) -> usize {
        self.quarantine.capacity()
    }

    /// Change the quarantine bound. Negative sizes clamp to zero. Returns
    /// records evicted to fit the new bound, oldest first.
    ///
    /// Never fails: a referent whose drop panics is counted in
    /// `release_failures`. Only closed handles are affected; the builder
    /// history has its own bound ([`Self::set_builder_history_size`]).
    pub fn set_closed_handles_queue_max_size(&mut self, size: i64) -> Vec<HandleRecord> {
        let eviction = self.quarantine.set_capacity(clamp_capacity(size));
        self.count_eviction(eviction)
    }

    /// Bound the number of finished builders remembered for
    /// use-after-build reports. Starts at the configured quarantine size.
    pub fn set_builder_history_size(&mut self, size: i64) {
        self.builders.set_history(clamp_capacity(size));
    }

    pub fn set_on_invalid_handle_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&InvalidHandleUse) -> Result<(), CallbackError> + Send + 'static,
    {
        self.detector.set_callback(callback);
    }

    pub fn clear_on_invalid_handle_callback(&mut self) {
        self.detector.clear_callback();
    }

    pub fn set_on_invalid_builder_handle_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&InvalidBuilderUse) -> Result<(), CallbackError> + Send + 'static,
    {
        self.builders.set_callback(callback);
    }

    pub fn clear_on_invalid_builder_handle_callback(&mut self) {
        self.builders.clear_callback();
    }

    #[must_use]
    pub fn detector(&self) -> &InvalidHandleDetector {
        &self.detector
    }

    pub fn detector_mut(&mut self) -> &mut InvalidHandleDetector {
        &mut self.detector
    }

    #[must_use]
    pub fn builders(&self) -> &BuilderTracker {
        &self.builders
    }

    pub fn builders_mut(&mut self) -> &mut BuilderTracker {
        &mut self.builders
    }

    /// Most recent invalid handle use seen by this context.
    #[must_use]
    pub fn last_invalid_handle(&self) -> Option<&InvalidHandleUse> {
        self.detector.last_report()
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn closed_count(&self) -> usize {
        self.quarantine.len()
    }

    fn count_eviction(&self, eviction: Eviction) -> Vec<HandleRecord> {
        TrackerMetrics::add(&self.metrics.evictions, eviction.len() as u64);
        TrackerMetrics::add(
            &self.metrics.release_failures,
            eviction.release_failures as u64,
        );
        eviction.records
    }

    // -- teardown ----------------------------------------------------------

    /// Discard every open and quarantined handle, releasing referents.
    ///
    /// Never fails. A referent whose drop panics is counted and skipped.
    pub fn teardown(mut self) -> TeardownSummary {
        self.release_all()
    }

    fn release_all(&mut self) -> TeardownSummary {
        let mut summary = TeardownSummary::default();
        for handle in self.registry.drain_ordered() {
            summary.open_released += 1;
            if !handle.release().1 {
                summary.release_failures += 1;
            }
        }
        for handle in self.quarantine.drain_all() {
            summary.quarantined_released += 1;
            if !handle.release().1 {
                summary.release_failures += 1;
            }
        }
        TrackerMetrics::add(
            &self.metrics.release_failures,
            summary.release_failures as u64,
        );
        summary
    }
}

impl<T> Default for DebugContext<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for DebugContext<T> {
    fn drop(&mut self) {
        let _ = self.release_all();
    }
}
