//! Debug-context configuration.
//!
//! Read from the environment by the embedding runtime when it creates a
//! debug context:
//! - `HANDLEGATE_MODE`: `debug` (default) validates every dereference and
//!   reports invalid handles; `off` keeps bookkeeping but skips detection.
//! - `HANDLEGATE_CLOSED_HANDLES_QUEUE_MAX_SIZE`: initial quarantine capacity.
//!
//! Nothing here is cached process-wide; each context gets its own copy.

use crate::quarantine::DEFAULT_QUARANTINE_CAPACITY;

pub const MODE_ENV: &str = "HANDLEGATE_MODE";
pub const QUEUE_MAX_SIZE_ENV: &str = "HANDLEGATE_CLOSED_HANDLES_QUEUE_MAX_SIZE";

/// Whether handle uses are validated and reported.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebugLevel {
    /// Validate every dereference and report invalid handles.
    #[default]
    Report,
    /// Track lifecycles only. Baseline for benchmarking.
    Off,
}

impl DebugLevel {
    /// Parse from string (case-insensitive). Unrecognized values select
    /// `Report`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "report" | "on" | "default" => Self::Report,
            "off" | "none" | "universal" | "disabled" => Self::Off,
            _ => Self::Report,
        }
    }

    #[must_use]
    pub const fn validation_enabled(self) -> bool {
        matches!(self, Self::Report)
    }
}

/// Settings for one debug context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    pub level: DebugLevel,
    pub closed_handles_queue_max_size: usize,
}

impl DebugConfig {
    /// Build from an arbitrary key lookup. Missing or unparsable values fall
    /// back to defaults; negative sizes clamp to zero.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = lookup(MODE_ENV)
            .map(|v| DebugLevel::from_str_loose(&v))
            .unwrap_or_default();
        let closed_handles_queue_max_size = lookup(QUEUE_MAX_SIZE_ENV)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(clamp_capacity)
            .unwrap_or(DEFAULT_QUARANTINE_CAPACITY);
        Self {
            level,
            closed_handles_queue_max_size,
        }
    }

    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn with_level(mut self, level: DebugLevel) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_closed_handles_queue_max_size(mut self, size: usize) -> Self {
        self.closed_handles_queue_max_size = size;
        self
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            level: DebugLevel::default(),
            closed_handles_queue_max_size: DEFAULT_QUARANTINE_CAPACITY,
        }
    }
}

/// Clamp a boundary-supplied signed size into a capacity.
#[must_use]
pub fn clamp_capacity(size: i64) -> usize {
    usize::try_from(size.max(0)).unwrap_or(usize::MAX)
}
