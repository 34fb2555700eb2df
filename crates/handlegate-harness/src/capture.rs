//! Records every invalid-handle report delivered by a [`DebugAbi`].

use std::sync::Arc;

use parking_lot::Mutex;

use handlegate_abi::DebugAbi;
use handlegate_membrane::{InvalidHandleUse, ValidationResult};

/// Shared log of invalid-handle reports.
///
/// Installing a capture replaces whatever callback the session had.
#[derive(Debug, Clone, Default)]
pub struct InvalidHandleCapture {
    seen: Arc<Mutex<Vec<InvalidHandleUse>>>,
}

impl InvalidHandleCapture {
    /// Install a recording callback on `abi`.
    pub fn install<T>(abi: &DebugAbi<T>) -> Self {
        let capture = Self::default();
        let sink = Arc::clone(&capture.seen);
        abi.set_on_invalid_handle_callback(move |report: &InvalidHandleUse| {
            sink.lock().push(*report);
            Ok(())
        });
        capture
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }

    #[must_use]
    pub fn count_of(&self, classification: ValidationResult) -> usize {
        self.seen
            .lock()
            .iter()
            .filter(|r| r.classification == classification)
            .count()
    }

    #[must_use]
    pub fn last(&self) -> Option<InvalidHandleUse> {
        self.seen.lock().last().copied()
    }

    /// Reports recorded at or after index `from`.
    #[must_use]
    pub fn since(&self, from: usize) -> Vec<InvalidHandleUse> {
        self.seen.lock().get(from..).map(<[_]>::to_vec).unwrap_or_default()
    }
}
