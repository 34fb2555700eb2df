//! Registry of currently open handles.
//!
//! Lookups by id are hash-based so `register`, `close` and the valid-handle
//! path of validation stay O(1). Enumeration sorts by creation sequence so
//! query output never depends on hash iteration order.

use std::collections::HashMap;

use crate::error::TrackerError;
use crate::generation::Generation;
use crate::handle::{Handle, HandleId};

/// Set of open handles keyed by id.
#[derive(Debug)]
pub struct HandleRegistry<T> {
    open: HashMap<HandleId, Handle<T>>,
    next_sequence: u64,
}

impl<T> HandleRegistry<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            open: HashMap::new(),
            next_sequence: 0,
        }
    }

    /// Track a newly created handle.
    ///
    /// Fails with [`TrackerError::DuplicateHandle`] when `id` is already open.
    /// A failed registration does not consume a sequence number; the rejected
    /// referent is dropped.
    pub fn register(
        &mut self,
        id: HandleId,
        referent: T,
        generation: Generation,
    ) -> Result<&Handle<T>, TrackerError> {
        use std::collections::hash_map::Entry;

        match self.open.entry(id) {
            Entry::Occupied(_) => Err(TrackerError::DuplicateHandle { id }),
            Entry::Vacant(slot) => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                Ok(slot.insert(Handle::open(id, generation, sequence, referent)))
            }
        }
    }

    /// Remove and return the open record for `id`.
    pub fn close(&mut self, id: HandleId) -> Result<Handle<T>, TrackerError> {
        self.open
            .remove(&id)
            .ok_or(TrackerError::UnknownHandle { id })
    }

    #[must_use]
    pub fn get(&self, id: HandleId) -> Option<&Handle<T>> {
        self.open.get(&id)
    }

    #[must_use]
    pub fn contains(&self, id: HandleId) -> bool {
        self.open.contains_key(&id)
    }

    /// Open handles created at or after `generation`, oldest sequence first.
    #[must_use]
    pub fn open_handles_since(&self, generation: Generation) -> Vec<&Handle<T>> {
        let mut handles: Vec<&Handle<T>> = self
            .open
            .values()
            .filter(|h| h.creation_generation() >= generation)
            .collect();
        handles.sort_unstable_by_key(|h| h.sequence());
        handles
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.open.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    /// Sequence number the next registration will receive.
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Remove every open handle, in creation order.
    pub(crate) fn drain_ordered(&mut self) -> Vec<Handle<T>> {
        let mut handles: Vec<Handle<T>> = self.open.drain().map(|(_, h)| h).collect();
        handles.sort_unstable_by_key(Handle::sequence);
        handles
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
