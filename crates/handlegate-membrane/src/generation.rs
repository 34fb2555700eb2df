//! Generation counter used to scope "handles created since" queries.

/// Generation epoch. Starts at [`BASE_GENERATION`].
pub type Generation = u64;

/// Epoch in effect before the first `new_generation` call.
pub const BASE_GENERATION: Generation = 0;

/// Monotonic epoch counter owned by a debug context.
#[derive(Debug, Clone)]
pub struct GenerationCounter {
    current: Generation,
}

impl GenerationCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: BASE_GENERATION,
        }
    }

    /// Epoch that newly registered handles are tagged with.
    #[must_use]
    pub const fn current(&self) -> Generation {
        self.current
    }

    /// Advance the epoch and return the new value.
    pub fn new_generation(&mut self) -> Generation {
        self.current = self.current.saturating_add(1);
        self.current
    }
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_base() {
        assert_eq!(GenerationCounter::new().current(), BASE_GENERATION);
    }

    #[test]
    fn two_calls_from_base_return_one_then_two() {
        let mut counter = GenerationCounter::new();
        assert_eq!(counter.new_generation(), 1);
        assert_eq!(counter.new_generation(), 2);
        assert_eq!(counter.current(), 2);
    }
}
