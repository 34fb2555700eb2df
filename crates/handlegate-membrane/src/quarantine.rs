//! Bounded FIFO of recently closed handles.
//!
//! Closed handles are held here instead of being dropped so a later use of
//! the same id can be reported as use-after-close. The window is bounded by
//! entry count: once a handle falls off the head, its id is
//! indistinguishable from one that was never registered.

use std::collections::VecDeque;

use crate::handle::{Handle, HandleId, HandleRecord, HandleState};

/// Default number of closed handles kept for use-after-close detection.
pub const DEFAULT_QUARANTINE_CAPACITY: usize = 1024;

/// Handles pushed off the head of the quarantine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eviction {
    /// Evicted records, oldest first.
    pub records: Vec<HandleRecord>,
    /// Evicted referents whose drop panicked.
    pub release_failures: usize,
}

impl Eviction {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Capacity-bounded queue of quarantined handles, oldest at the head.
#[derive(Debug)]
pub struct ClosedHandleQuarantine<T> {
    queue: VecDeque<Handle<T>>,
    capacity: usize,
}

impl<T> ClosedHandleQuarantine<T> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            capacity,
        }
    }

    /// Append a closed handle and evict from the head while over capacity.
    ///
    /// Evicted referents are released before this returns; a panicking drop
    /// is counted in the [`Eviction`] instead of unwinding. With a capacity
    /// of zero the pushed handle itself is evicted immediately.
    pub fn push(&mut self, mut handle: Handle<T>) -> Eviction {
        handle.advance(HandleState::Quarantined);
        self.queue.push_back(handle);
        self.evict_to(self.capacity)
    }

    /// Change the bound, evicting the oldest entries if it shrank below the
    /// current size.
    pub fn set_capacity(&mut self, capacity: usize) -> Eviction {
        self.capacity = capacity;
        self.evict_to(capacity)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current contents, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<&Handle<T>> {
        self.queue.iter().collect()
    }

    /// Most recently closed handle with this id, if still quarantined.
    ///
    /// The ABI layer may reuse an id after its first close, so several
    /// entries can share an id; the newest one wins.
    #[must_use]
    pub fn find(&self, id: HandleId) -> Option<&Handle<T>> {
        self.queue.iter().rev().find(|h| h.id() == id)
    }

    #[must_use]
    pub fn contains(&self, id: HandleId) -> bool {
        self.find(id).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Remove every quarantined handle, oldest first.
    pub(crate) fn drain_all(&mut self) -> Vec<Handle<T>> {
        self.queue.drain(..).collect()
    }

    fn evict_to(&mut self, limit: usize) -> Eviction {
        let mut evicted = Eviction::default();
        while self.queue.len() > limit {
            let Some(oldest) = self.queue.pop_front() else {
                break;
            };
            let (record, released) = oldest.release();
            evicted.records.push(record);
            if !released {
                evicted.release_failures += 1;
            }
        }
        evicted
    }
}

impl<T> Default for ClosedHandleQuarantine<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUARANTINE_CAPACITY)
    }
}
