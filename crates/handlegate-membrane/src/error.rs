//! Error taxonomy for the tracker.
//!
//! Invalid handle *use* by native code is not an error here: it is classified
//! and reported through the detector callback. The variants below are either
//! programmer errors in the ABI layer, boundary violations, or failures raised
//! by user-supplied callbacks.

use thiserror::Error;

use crate::detector::ValidationResult;
use crate::handle::{HandleId, HandleRecord};

/// Error type produced by a user callback.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum TrackerError {
    /// The ABI layer registered an id that is already open.
    #[error("handle {id} is already open")]
    DuplicateHandle { id: HandleId },
    /// `close` on an id that is not open, seen at the registry level.
    #[error("handle {id} is not open")]
    UnknownHandle { id: HandleId },
    /// User code tried to instantiate the opaque handle wrapper.
    #[error("handle records cannot be constructed directly")]
    ConstructionNotAllowed,
    /// The diagnostic callback failed while reporting an invalid handle.
    #[error("invalid-handle callback failed for {id} ({classification:?}): {source}")]
    Callback {
        id: HandleId,
        classification: ValidationResult,
        #[source]
        source: CallbackError,
    },
    /// Handles opened inside a leak-detection window were never closed.
    #[error("{} handle(s) leaked", records.len())]
    HandleLeak { records: Vec<HandleRecord> },
    /// `LeakDetector::stop` without a matching `start`.
    #[error("leak detector was not started")]
    LeakDetectorNotStarted,
}

impl TrackerError {
    /// Classification carried by a callback failure, if any.
    #[must_use]
    pub fn classification(&self) -> Option<ValidationResult> {
        match self {
            Self::Callback { classification, .. } => Some(*classification),
            _ => None,
        }
    }
}
