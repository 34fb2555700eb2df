//! Invalid-handle classification and reporting.
//!
//! Every dereference the ABI layer performs in debug mode goes through
//! [`InvalidHandleDetector::validate`]. The outcome is always returned to the
//! caller; non-valid outcomes are additionally pushed to a user-installed
//! hook. The detector never decides recovery.
//!
//! Classification order:
//! 1. open in the registry -> `Valid`
//! 2. held by the quarantine -> `UseAfterClose`
//! 3. otherwise -> `Unknown`
//!
//! `Unknown` covers both ids that were never registered and ids whose closed
//! handle has already been evicted from the quarantine. The two cases cannot
//! be told apart with a bounded window.

use serde::{Deserialize, Serialize};

use crate::error::{CallbackError, TrackerError};
use crate::generation::Generation;
use crate::handle::{Handle, HandleId};
use crate::metrics::TrackerMetrics;
use crate::quarantine::ClosedHandleQuarantine;
use crate::registry::HandleRegistry;

/// Classification of a handle id at the moment of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResult {
    Valid,
    UseAfterClose,
    Unknown,
}

impl ValidationResult {
    #[must_use]
    pub const fn is_valid(self) -> bool {
        matches!(self, Self::Valid)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::UseAfterClose => "use_after_close",
            Self::Unknown => "unknown",
        }
    }
}

/// Tracker operation that observed the invalid handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Dereference,
    Close,
}

/// Diagnostic record delivered for every invalid handle use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvalidHandleUse {
    pub id: HandleId,
    pub classification: ValidationResult,
    /// Known only while the closed handle is still quarantined.
    pub creation_generation: Option<Generation>,
    pub sequence: Option<u64>,
    pub operation: Operation,
}

/// Single-method diagnostic hook.
///
/// Closures of the shape `FnMut(&R) -> Result<(), CallbackError>` implement
/// it directly.
pub trait InvalidHandleHook<R>: Send {
    fn report(&mut self, report: &R) -> Result<(), CallbackError>;
}

impl<R, F> InvalidHandleHook<R> for F
where
    F: FnMut(&R) -> Result<(), CallbackError> + Send,
{
    fn report(&mut self, report: &R) -> Result<(), CallbackError> {
        self(report)
    }
}

/// Optional hook plus the last report, shared by handle and builder checks.
pub struct ReportSink<R> {
    hook: Option<Box<dyn InvalidHandleHook<R>>>,
    last: Option<R>,
}

impl<R: Clone> ReportSink<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            hook: None,
            last: None,
        }
    }

    pub fn set_hook(&mut self, hook: Box<dyn InvalidHandleHook<R>>) {
        self.hook = Some(hook);
    }

    pub fn clear_hook(&mut self) {
        self.hook = None;
    }

    #[must_use]
    pub fn has_hook(&self) -> bool {
        self.hook.is_some()
    }

    #[must_use]
    pub fn last(&self) -> Option<&R> {
        self.last.as_ref()
    }

    /// Record `report` and pass it to the hook if one is installed.
    ///
    /// Returns whether a hook received it. Hook errors are returned as-is.
    pub fn deliver(&mut self, report: R) -> Result<bool, CallbackError> {
        self.last = Some(report.clone());
        match self.hook.as_mut() {
            Some(hook) => hook.report(&report).map(|()| true),
            None => Ok(false),
        }
    }
}

impl<R: Clone> Default for ReportSink<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> std::fmt::Debug for ReportSink<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportSink")
            .field("hook", &self.hook.as_ref().map(|_| "<hook>"))
            .field("has_last", &self.last.is_some())
            .finish()
    }
}

/// Classifies handle ids against the registry and quarantine and reports
/// invalid uses.
#[derive(Debug, Default)]
pub struct InvalidHandleDetector {
    sink: ReportSink<InvalidHandleUse>,
}

impl InvalidHandleDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pure classification, no reporting.
    #[must_use]
    pub fn classify<'a, T>(
        id: HandleId,
        registry: &'a HandleRegistry<T>,
        quarantine: &'a ClosedHandleQuarantine<T>,
    ) -> (ValidationResult, Option<&'a Handle<T>>) {
        if let Some(open) = registry.get(id) {
            return (ValidationResult::Valid, Some(open));
        }
        match quarantine.find(id) {
            Some(closed) => (ValidationResult::UseAfterClose, Some(closed)),
            None => (ValidationResult::Unknown, None),
        }
    }

    /// Classify `id` and report it if it is not valid.
    ///
    /// The classification is always produced. If the installed hook fails,
    /// its error is returned as [`TrackerError::Callback`], which carries the
    /// classification.
    pub fn validate<T>(
        &mut self,
        id: HandleId,
        operation: Operation,
        registry: &HandleRegistry<T>,
        quarantine: &ClosedHandleQuarantine<T>,
        metrics: &TrackerMetrics,
    ) -> Result<ValidationResult, TrackerError> {
        let (classification, known) = Self::classify(id, registry, quarantine);
        match classification {
            ValidationResult::Valid => return Ok(classification),
            ValidationResult::UseAfterClose => TrackerMetrics::inc(&metrics.use_after_close),
            ValidationResult::Unknown => TrackerMetrics::inc(&metrics.unknown_handles),
        }

        let report = InvalidHandleUse {
            id,
            classification,
            creation_generation: known.map(Handle::creation_generation),
            sequence: known.map(Handle::sequence),
            operation,
        };
        match self.sink.deliver(report) {
            Ok(delivered) => {
                if delivered {
                    TrackerMetrics::inc(&metrics.reports_delivered);
                }
                Ok(classification)
            }
            Err(source) => {
                TrackerMetrics::inc(&metrics.callback_failures);
                Err(TrackerError::Callback {
                    id,
                    classification,
                    source,
                })
            }
        }
    }

    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&InvalidHandleUse) -> Result<(), CallbackError> + Send + 'static,
    {
        self.sink.set_hook(Box::new(callback));
    }

    pub fn set_hook(&mut self, hook: Box<dyn InvalidHandleHook<InvalidHandleUse>>) {
        self.sink.set_hook(hook);
    }

    pub fn clear_callback(&mut self) {
        self.sink.clear_hook();
    }

    #[must_use]
    pub fn has_callback(&self) -> bool {
        self.sink.has_hook()
    }

    /// Most recent invalid use, whether or not a callback was installed.
    #[must_use]
    pub fn last_report(&self) -> Option<&InvalidHandleUse> {
        self.sink.last()
    }
}
