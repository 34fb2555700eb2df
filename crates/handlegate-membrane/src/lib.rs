//! Debug-mode handle-safety membrane for handlegate.
//!
//! Native extensions never see raw object pointers: every object they touch is
//! addressed through an opaque handle. In debug mode this crate sits between
//! the native ABI layer and the embedding runtime and catches handles that are
//! used after close, or that never existed, without crashing the host.
//!
//! # Architecture
//!
//! The membrane consists of:
//! - **Generation counter** (`generation`): epochs that scope "opened since" queries
//! - **Handle registry** (`registry`): open handles with creation epoch and sequence
//! - **Closed-handle quarantine** (`quarantine`): bounded FIFO for use-after-close detection
//! - **Invalid-handle detector** (`detector`): classification plus diagnostic hook
//! - **Builder tracker** (`builder`): tuple/list builder handle checks
//! - **Debug context** (`context`): owner of all of the above, plus the query surface
//! - **Leak detector** (`leak`): generation-scoped "nothing left open" check
//! - **Configuration** (`config`): per-context mode and quarantine size
//! - **Metrics** (`metrics`): atomic counters for observability

pub mod builder;
pub mod config;
pub mod context;
pub mod detector;
pub mod error;
pub mod generation;
pub mod handle;
pub mod leak;
pub mod metrics;
pub mod quarantine;
pub mod registry;

pub use builder::{BuilderKind, BuilderTracker, InvalidBuilderUse};
pub use config::{DebugConfig, DebugLevel};
pub use context::{CloseOutcome, DebugContext, TeardownSummary};
pub use detector::{
    InvalidHandleDetector, InvalidHandleHook, InvalidHandleUse, Operation, ValidationResult,
};
pub use error::{CallbackError, TrackerError};
pub use generation::{BASE_GENERATION, Generation, GenerationCounter};
pub use handle::{Handle, HandleId, HandleRecord, HandleState};
pub use leak::LeakDetector;
pub use metrics::{MetricsSnapshot, TrackerMetrics};
pub use quarantine::{ClosedHandleQuarantine, DEFAULT_QUARANTINE_CAPACITY, Eviction};
pub use registry::HandleRegistry;
