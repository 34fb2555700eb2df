//! Generation-scoped leak detection.
//!
//! `start` opens a fresh generation; `stop` fails if any handle created since
//! then is still open.

use crate::context::DebugContext;
use crate::error::TrackerError;
use crate::generation::Generation;
use crate::handle::HandleRecord;

#[derive(Debug, Default, Clone, Copy)]
pub struct LeakDetector {
    generation: Option<Generation>,
}

impl LeakDetector {
    #[must_use]
    pub const fn new() -> Self {
        Self { generation: None }
    }

    /// Begin a detection window. Restarting moves the window forward.
    pub fn start<T>(&mut self, ctx: &mut DebugContext<T>) -> Generation {
        let generation = ctx.new_generation();
        self.generation = Some(generation);
        generation
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.generation.is_some()
    }

    /// Handles opened since `start` and still open, in creation order.
    pub fn leaks<T>(&self, ctx: &DebugContext<T>) -> Result<Vec<HandleRecord>, TrackerError> {
        let generation = self.generation.ok_or(TrackerError::LeakDetectorNotStarted)?;
        Ok(ctx
            .get_open_handles(generation)
            .into_iter()
            .map(|h| h.record())
            .collect())
    }

    /// End the window, failing with [`TrackerError::HandleLeak`] if anything
    /// opened inside it is still open.
    pub fn stop<T>(&mut self, ctx: &DebugContext<T>) -> Result<(), TrackerError> {
        let records = self.leaks(ctx)?;
        self.generation = None;
        if records.is_empty() {
            Ok(())
        } else {
            Err(TrackerError::HandleLeak { records })
        }
    }
}
