//! Tracking for tuple/list builder handles.
//!
//! A builder handle is opened, filled item by item, and then either built or
//! cancelled. Touching a builder after it finished, or one that never
//! existed, is reported to a dedicated hook separate from the ordinary
//! invalid-handle hook.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::detector::{InvalidHandleHook, ReportSink, ValidationResult};
use crate::error::{CallbackError, TrackerError};
use crate::handle::HandleId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderKind {
    Tuple,
    List,
}

/// How a builder was finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuilderEnd {
    Built,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderOperation {
    SetItem,
    Build,
    Cancel,
}

/// Diagnostic record for an invalid builder use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InvalidBuilderUse {
    pub id: HandleId,
    pub operation: BuilderOperation,
    /// Kind and end state, known while the finished builder is remembered.
    pub kind: Option<BuilderKind>,
    pub ended: Option<BuilderEnd>,
}

#[derive(Debug, Clone, Copy)]
struct OpenBuilder {
    kind: BuilderKind,
    size: usize,
}

#[derive(Debug, Clone, Copy)]
struct FinishedBuilder {
    id: HandleId,
    kind: BuilderKind,
    ended: BuilderEnd,
}

/// Open builders plus a bounded history of finished ones.
#[derive(Debug)]
pub struct BuilderTracker {
    open: HashMap<HandleId, OpenBuilder>,
    finished: VecDeque<FinishedBuilder>,
    history: usize,
    sink: ReportSink<InvalidBuilderUse>,
}

impl BuilderTracker {
    #[must_use]
    pub fn new(history: usize) -> Self {
        Self {
            open: HashMap::new(),
            finished: VecDeque::new(),
            history,
            sink: ReportSink::new(),
        }
    }

    /// Track a new builder with room for `size` items.
    pub fn open_builder(
        &mut self,
        id: HandleId,
        kind: BuilderKind,
        size: usize,
    ) -> Result<(), TrackerError> {
        if self.open.contains_key(&id) {
            return Err(TrackerError::DuplicateHandle { id });
        }
        self.open.insert(id, OpenBuilder { kind, size });
        Ok(())
    }

    /// Check a `set_item` call. Returns false (after reporting) when the
    /// builder is not open. An out-of-range index is rejected without a
    /// report: that is an argument error, not a handle error.
    pub fn set_item(&mut self, id: HandleId, index: usize) -> Result<bool, TrackerError> {
        match self.open.get(&id) {
            Some(b) => Ok(index < b.size),
            None => self.report(id, BuilderOperation::SetItem).map(|()| false),
        }
    }

    /// Finish a builder successfully.
    pub fn build(&mut self, id: HandleId) -> Result<bool, TrackerError> {
        self.finish(id, BuilderEnd::Built, BuilderOperation::Build)
    }

    /// Abandon a builder.
    pub fn cancel(&mut self, id: HandleId) -> Result<bool, TrackerError> {
        self.finish(id, BuilderEnd::Cancelled, BuilderOperation::Cancel)
    }

    #[must_use]
    pub fn is_open(&self, id: HandleId) -> bool {
        self.open.contains_key(&id)
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Finished builders still remembered.
    #[must_use]
    pub fn history_len(&self) -> usize {
        self.finished.len()
    }

    pub fn set_history(&mut self, history: usize) {
        self.history = history;
        self.trim();
    }

    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&InvalidBuilderUse) -> Result<(), CallbackError> + Send + 'static,
    {
        self.sink.set_hook(Box::new(callback));
    }

    pub fn set_hook(&mut self, hook: Box<dyn InvalidHandleHook<InvalidBuilderUse>>) {
        self.sink.set_hook(hook);
    }

    pub fn clear_callback(&mut self) {
        self.sink.clear_hook();
    }

    #[must_use]
    pub fn last_report(&self) -> Option<&InvalidBuilderUse> {
        self.sink.last()
    }

    fn finish(
        &mut self,
        id: HandleId,
        ended: BuilderEnd,
        operation: BuilderOperation,
    ) -> Result<bool, TrackerError> {
        let Some(builder) = self.open.remove(&id) else {
            return self.report(id, operation).map(|()| false);
        };
        self.finished.push_back(FinishedBuilder {
            id,
            kind: builder.kind,
            ended,
        });
        self.trim();
        Ok(true)
    }

    fn report(&mut self, id: HandleId, operation: BuilderOperation) -> Result<(), TrackerError> {
        let past = self.finished.iter().rev().find(|f| f.id == id);
        let report = InvalidBuilderUse {
            id,
            operation,
            kind: past.map(|f| f.kind),
            ended: past.map(|f| f.ended),
        };
        let classification = if past.is_some() {
            ValidationResult::UseAfterClose
        } else {
            ValidationResult::Unknown
        };
        self.sink
            .deliver(report)
            .map(|_| ())
            .map_err(|source| TrackerError::Callback {
                id,
                classification,
                source,
            })
    }

    fn trim(&mut self) {
        while self.finished.len() > self.history {
            self.finished.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn id(raw: u64) -> HandleId {
        HandleId::new(raw)
    }

    fn tracker_with_log() -> (BuilderTracker, Arc<Mutex<Vec<InvalidBuilderUse>>>) {
        let mut t = BuilderTracker::new(4);
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        t.set_callback(move |r: &InvalidBuilderUse| {
            sink.lock().unwrap().push(*r);
            Ok(())
        });
        (t, log)
    }

    #[test]
    fn normal_build_reports_nothing() {
        let (mut t, log) = tracker_with_log();
        t.open_builder(id(1), BuilderKind::Tuple, 2).unwrap();
        assert!(t.set_item(id(1), 0).unwrap());
        assert!(t.set_item(id(1), 1).unwrap());
        assert!(t.build(id(1)).unwrap());
        assert!(!t.is_open(id(1)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn out_of_range_item_is_not_a_handle_error() {
        let (mut t, log) = tracker_with_log();
        t.open_builder(id(1), BuilderKind::List, 1).unwrap();
        assert!(!t.set_item(id(1), 5).unwrap());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn set_item_after_build_is_reported_with_history() {
        let (mut t, log) = tracker_with_log();
        t.open_builder(id(3), BuilderKind::List, 1).unwrap();
        t.build(id(3)).unwrap();

        assert!(!t.set_item(id(3), 0).unwrap());
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].operation, BuilderOperation::SetItem);
        assert_eq!(log[0].kind, Some(BuilderKind::List));
        assert_eq!(log[0].ended, Some(BuilderEnd::Built));
    }

    #[test]
    fn double_cancel_is_reported() {
        let (mut t, log) = tracker_with_log();
        t.open_builder(id(4), BuilderKind::Tuple, 0).unwrap();
        assert!(t.cancel(id(4)).unwrap());
        assert!(!t.cancel(id(4)).unwrap());
        assert_eq!(log.lock().unwrap()[0].ended, Some(BuilderEnd::Cancelled));
    }

    #[test]
    fn unknown_builder_has_no_history() {
        let (mut t, log) = tracker_with_log();
        assert!(!t.build(id(9)).unwrap());
        let log = log.lock().unwrap();
        assert_eq!(log[0].kind, None);
        assert_eq!(log[0].ended, None);
    }

    #[test]
    fn history_is_bounded() {
        let mut t = BuilderTracker::new(1);
        t.open_builder(id(1), BuilderKind::Tuple, 0).unwrap();
        t.open_builder(id(2), BuilderKind::Tuple, 0).unwrap();
        t.build(id(1)).unwrap();
        t.build(id(2)).unwrap();
        t.build(id(1)).unwrap();
        assert_eq!(t.last_report().unwrap().ended, None);
    }

    #[test]
    fn duplicate_open_is_fatal() {
        let mut t = BuilderTracker::new(1);
        t.open_builder(id(1), BuilderKind::Tuple, 0).unwrap();
        assert!(matches!(
            t.open_builder(id(1), BuilderKind::List, 0),
            Err(TrackerError::DuplicateHandle { .. })
        ));
    }

    #[test]
    fn failing_hook_propagates() {
        let mut t = BuilderTracker::new(1);
        t.set_callback(|_: &InvalidBuilderUse| Err("no".into()));
        assert!(matches!(
            t.build(id(1)),
            Err(TrackerError::Callback { .. })
        ));
    }
}
