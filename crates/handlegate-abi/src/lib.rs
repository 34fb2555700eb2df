//! # handlegate-abi
//!
//! Handle table used by native extension entry points, wired to the
//! handlegate debug membrane.
//!
//! # Architecture
//!
//! ```text
//! C caller -> ffi (this crate) -> DebugAbi -> DebugContext (membrane) -> referent
//! ```
//!
//! With [`DebugLevel::Report`](handlegate_membrane::DebugLevel) every
//! dereference and close is validated and invalid handles are reported. With
//! `Off` handles are still tracked, but nothing is reported.

pub mod debug_abi;
pub mod ffi;
pub mod id_allocator;

pub use debug_abi::DebugAbi;
pub use id_allocator::{HandleIdAllocator, NULL_HANDLE};
