//! Tracked handle records.
//!
//! A [`Handle`] is the tracker's bookkeeping for one handle identity handed
//! out by the ABI layer. It owns the referent for as long as the handle is
//! open or quarantined. [`HandleRecord`] is the read-only, copyable view that
//! leaves the tracker through queries, diagnostics and log output.
//!
//! Neither type can be built outside this crate: every record originates from
//! a registration.

use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;

use crate::error::TrackerError;
use crate::generation::Generation;

/// Opaque handle identity supplied by the ABI layer.
///
/// The tracker never interprets the value; it only compares and hashes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl HandleId {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Lifecycle state of a tracked handle.
///
/// Transitions only move forward: `Open -> Quarantined -> Discarded`, or
/// straight to `Discarded` on context teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Open,
    Quarantined,
    Discarded,
}

impl HandleState {
    /// Returns true once the ABI layer has reported a close.
    #[must_use]
    pub const fn is_closed(self) -> bool {
        !matches!(self, Self::Open)
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Quarantined => 1,
            Self::Discarded => 2,
        }
    }
}

/// A tracked handle together with the referent it keeps alive.
#[derive(Debug)]
pub struct Handle<T> {
    id: HandleId,
    creation_generation: Generation,
    sequence: u64,
    state: HandleState,
    referent: T,
}

impl<T> Handle<T> {
    pub(crate) fn open(
        id: HandleId,
        creation_generation: Generation,
        sequence: u64,
        referent: T,
    ) -> Self {
        Self {
            id,
            creation_generation,
            sequence,
            state: HandleState::Open,
            referent,
        }
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    /// Generation that was current when the handle was registered.
    #[must_use]
    pub fn creation_generation(&self) -> Generation {
        self.creation_generation
    }

    /// Creation-order key. Unique for the lifetime of the owning context.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    #[must_use]
    pub fn referent(&self) -> &T {
        &self.referent
    }

    /// Copyable view of this handle's bookkeeping.
    #[must_use]
    pub fn record(&self) -> HandleRecord {
        HandleRecord {
            id: self.id,
            creation_generation: self.creation_generation,
            sequence: self.sequence,
            state: self.state,
        }
    }

    /// Advance the lifecycle. Backward moves are ignored.
    pub(crate) fn advance(&mut self, next: HandleState) {
        debug_assert!(
            next.rank() >= self.state.rank(),
            "handle {} moved backward: {:?} -> {:?}",
            self.id,
            self.state,
            next
        );
        if next.rank() > self.state.rank() {
            self.state = next;
        }
    }

    /// Mark discarded and hand back the final record, dropping the referent.
    pub(crate) fn into_parts(mut self) -> (HandleRecord, T) {
        self.advance(HandleState::Discarded);
        (self.record(), self.referent)
    }

    /// Discard the handle and drop its referent.
    ///
    /// A panicking drop is caught; the flag is false when that happened.
    pub(crate) fn release(self) -> (HandleRecord, bool) {
        let (record, referent) = self.into_parts();
        let released = catch_unwind(AssertUnwindSafe(move || drop(referent))).is_ok();
        (record, released)
    }
}

/// Read-only view of a tracked handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HandleRecord {
    id: HandleId,
    creation_generation: Generation,
    sequence: u64,
    state: HandleState,
}

impl HandleRecord {
    /// Boundary entry point for "construct a handle wrapper from user code".
    ///
    /// Embedding runtimes bind their wrapper type's constructor to this. It
    /// always fails: records only come out of a [`crate::DebugContext`].
    pub fn try_construct(_id: HandleId) -> Result<Self, TrackerError> {
        Err(TrackerError::ConstructionNotAllowed)
    }

    #[must_use]
    pub fn id(&self) -> HandleId {
        self.id
    }

    #[must_use]
    pub fn creation_generation(&self) -> Generation {
        self.creation_generation
    }

    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }
}

impl std::fmt::Display for HandleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<handle {} gen={} seq={} {:?}>",
            self.id, self.creation_generation, self.sequence, self.state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_handle_is_open() {
        let h = Handle::open(HandleId::new(7), 3, 11, "obj");
        assert_eq!(h.state(), HandleState::Open);
        assert!(!h.is_closed());
        assert_eq!(h.id().raw(), 7);
        assert_eq!(h.creation_generation(), 3);
        assert_eq!(h.sequence(), 11);
        assert_eq!(*h.referent(), "obj");
    }

    #[test]
    fn advance_is_forward_only() {
        let mut h = Handle::open(HandleId::new(1), 0, 0, ());
        h.advance(HandleState::Quarantined);
        assert_eq!(h.state(), HandleState::Quarantined);
        assert!(h.is_closed());
        let (rec, released) = h.release();
        assert_eq!(rec.state(), HandleState::Discarded);
        assert!(released);
    }

    #[test]
    fn record_mirrors_handle() {
        let h = Handle::open(HandleId::new(0x2a), 5, 9, 1u8);
        let rec = h.record();
        assert_eq!(rec.id(), h.id());
        assert_eq!(rec.creation_generation(), 5);
        assert_eq!(rec.sequence(), 9);
        assert_eq!(rec.state(), HandleState::Open);
        assert_eq!(rec.to_string(), "<handle 0x2a gen=5 seq=9 Open>");
    }

    #[test]
    fn records_cannot_be_constructed_by_users() {
        let err = HandleRecord::try_construct(HandleId::new(1)).unwrap_err();
        assert!(matches!(err, TrackerError::ConstructionNotAllowed));
    }

    #[test]
    fn record_serializes_flat() {
        let rec = Handle::open(HandleId::new(3), 1, 2, ()).record();
        let json = serde_json::to_value(rec).unwrap();
        assert_eq!(json["id"], 3);
        assert_eq!(json["creation_generation"], 1);
        assert_eq!(json["sequence"], 2);
        assert_eq!(json["state"], "open");
    }
}
