//! Handle id allocation for the ABI layer.
//!
//! Ids start at 1; 0 is the null handle. An id is only handed back to the
//! free list once its closed handle has left the debug quarantine, so a
//! quarantined id is never live at the same time.

use handlegate_membrane::HandleId;

/// The null handle. Never allocated.
pub const NULL_HANDLE: HandleId = HandleId::new(0);

#[derive(Debug)]
pub struct HandleIdAllocator {
    next: u64,
    free_list: Vec<u64>,
}

impl HandleIdAllocator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: 1,
            free_list: Vec::new(),
        }
    }

    /// Most recently released id first, otherwise a fresh one.
    pub fn allocate(&mut self) -> HandleId {
        if let Some(raw) = self.free_list.pop() {
            return HandleId::new(raw);
        }
        let raw = self.next;
        self.next += 1;
        HandleId::new(raw)
    }

    /// Make `id` available again.
    pub fn release(&mut self, id: HandleId) {
        if id != NULL_HANDLE {
            self.free_list.push(id.raw());
        }
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free_list.len()
    }
}

impl Default for HandleIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
