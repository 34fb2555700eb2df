//! Debug-mode handle table.
//!
//! `DebugAbi` is what native extension entry points call into: it hands out
//! handle ids, forwards lifecycle events to the membrane's [`DebugContext`],
//! and validates handles before giving out the referent.
//!
//! The context sits behind one `parking_lot::Mutex`, standing in for the
//! embedding runtime's execution lock. Invalid-handle hooks run while that
//! lock is held and must not call back into the same `DebugAbi`.

use parking_lot::Mutex;

use handlegate_membrane::{
    CallbackError, CloseOutcome, DebugConfig, DebugContext, DebugLevel, Generation, HandleId,
    HandleRecord, InvalidHandleUse, TeardownSummary, TrackerError, ValidationResult,
};

use crate::id_allocator::HandleIdAllocator;

struct AbiState<T> {
    ctx: DebugContext<T>,
    ids: HandleIdAllocator,
}

impl<T> AbiState<T> {
    fn recycle(&mut self, evicted: &[HandleRecord]) {
        for record in evicted {
            self.ids.release(record.id());
        }
    }
}

/// Handle table for one debug session.
pub struct DebugAbi<T> {
    level: DebugLevel,
    state: Mutex<AbiState<T>>,
}

impl<T> DebugAbi<T> {
    #[must_use]
    pub fn new(config: DebugConfig) -> Self {
        Self {
            level: config.level,
            state: Mutex::new(AbiState {
                ctx: DebugContext::with_config(&config),
                ids: HandleIdAllocator::new(),
            }),
        }
    }

    #[must_use]
    pub fn level(&self) -> DebugLevel {
        self.level
    }

    /// Create a handle for `referent`.
    pub fn open(&self, referent: T) -> Result<HandleId, TrackerError> {
        let mut state = self.state.lock();
        let id = state.ids.allocate();
        state.ctx.register(id, referent)?;
        Ok(id)
    }

    /// Close a handle. Ids evicted from the quarantine as a result become
    /// reusable.
    ///
    /// With [`DebugLevel::Off`] an invalid close is classified but not
    /// reported.
    pub fn close(&self, id: HandleId) -> Result<CloseOutcome, TrackerError> {
        let mut state = self.state.lock();
        if !self.level.validation_enabled() && state.ctx.open_handle(id).is_none() {
            return Ok(CloseOutcome::Rejected(state.ctx.classify(id)));
        }
        let outcome = state.ctx.close(id)?;
        state.recycle(outcome.evicted());
        Ok(outcome)
    }

    /// Validate `id` and, if it is open, run `f` on its referent.
    ///
    /// Returns `Ok(None)` for an invalid handle (after reporting it).
    pub fn with_referent<R>(
        &self,
        id: HandleId,
        f: impl FnOnce(&T) -> R,
    ) -> Result<Option<R>, TrackerError> {
        let mut state = self.state.lock();
        if self.level.validation_enabled() && !state.ctx.validate(id)?.is_valid() {
            return Ok(None);
        }
        Ok(state.ctx.referent(id).map(f))
    }

    /// Classify and report without touching the referent.
    pub fn validate(&self, id: HandleId) -> Result<ValidationResult, TrackerError> {
        let mut state = self.state.lock();
        if self.level.validation_enabled() {
            state.ctx.validate(id)
        } else {
            Ok(state.ctx.classify(id))
        }
    }

    /// Open a second handle to the same referent.
    pub fn dup(&self, id: HandleId) -> Result<Option<HandleId>, TrackerError>
    where
        T: Clone,
    {
        let mut state = self.state.lock();
        if self.level.validation_enabled() && !state.ctx.validate(id)?.is_valid() {
            return Ok(None);
        }
        let Some(referent) = state.ctx.referent(id).cloned() else {
            return Ok(None);
        };
        let new_id = state.ids.allocate();
        state.ctx.register(new_id, referent)?;
        Ok(Some(new_id))
    }

    pub fn new_generation(&self) -> Generation {
        self.state.lock().ctx.new_generation()
    }

    #[must_use]
    pub fn get_open_handles(&self, generation: Generation) -> Vec<HandleRecord> {
        let state = self.state.lock();
        state
            .ctx
            .get_open_handles(generation)
            .into_iter()
            .map(|h| h.record())
            .collect()
    }

    #[must_use]
    pub fn get_closed_handles(&self) -> Vec<HandleRecord> {
        let state = self.state.lock();
        state
            .ctx
            .get_closed_handles()
            .into_iter()
            .map(|h| h.record())
            .collect()
    }

    #[must_use]
    pub fn get_closed_handles_queue_max_size(&self) -> usize {
        self.state.lock().ctx.get_closed_handles_queue_max_size()
    }

    /// Resize the quarantine. Negative sizes clamp to zero.
    pub fn set_closed_handles_queue_max_size(&self, size: i64) {
        let mut state = self.state.lock();
        let evicted = state.ctx.set_closed_handles_queue_max_size(size);
        state.recycle(&evicted);
    }

    pub fn set_on_invalid_handle_callback<F>(&self, callback: F)
    where
        F: FnMut(&InvalidHandleUse) -> Result<(), CallbackError> + Send + 'static,
    {
        self.state.lock().ctx.set_on_invalid_handle_callback(callback);
    }

    pub fn clear_on_invalid_handle_callback(&self) {
        self.state.lock().ctx.clear_on_invalid_handle_callback();
    }

    /// Run `f` with exclusive access to the underlying context.
    pub fn with_context<R>(&self, f: impl FnOnce(&mut DebugContext<T>) -> R) -> R {
        f(&mut self.state.lock().ctx)
    }

    /// End the session, releasing every referent still held.
    pub fn teardown(self) -> TeardownSummary {
        self.state.into_inner().ctx.teardown()
    }
}

impl<T> Default for DebugAbi<T> {
    fn default() -> Self {
        Self::new(DebugConfig::default())
    }
}
