//! C boundary for native extensions.
//!
//! Every entry point takes an explicit context pointer created by
//! [`hg_debug_context_new`]; there is no process-wide state. Referents are
//! opaque 64-bit object tokens owned by the host runtime.
//!
//! Return conventions:
//! - classification codes: `0` valid, `1` use-after-close, `2` unknown
//! - `-1`: the installed callback failed or the context pointer was null

use std::ffi::{c_int, c_void};

use handlegate_membrane::{
    CloseOutcome, DebugConfig, HandleId, InvalidHandleUse, Operation, ValidationResult,
};
use thiserror::Error;

use crate::debug_abi::DebugAbi;
use crate::id_allocator::NULL_HANDLE;

pub const HG_VALID: c_int = 0;
pub const HG_USE_AFTER_CLOSE: c_int = 1;
pub const HG_UNKNOWN: c_int = 2;
pub const HG_ERROR: c_int = -1;

pub const HG_OP_DEREFERENCE: c_int = 0;
pub const HG_OP_CLOSE: c_int = 1;

/// Opaque debug context handed to C callers.
pub struct HgDebugContext {
    abi: DebugAbi<u64>,
}

/// Diagnostic record passed to the C callback.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct HgInvalidHandleReport {
    pub handle: u64,
    pub classification: c_int,
    pub operation: c_int,
    /// Non-zero when `creation_generation` and `sequence` are meaningful.
    pub has_provenance: c_int,
    pub creation_generation: u64,
    pub sequence: u64,
}

impl From<&InvalidHandleUse> for HgInvalidHandleReport {
    fn from(r: &InvalidHandleUse) -> Self {
        Self {
            handle: r.id.raw(),
            classification: classification_code(r.classification),
            operation: match r.operation {
                Operation::Dereference => HG_OP_DEREFERENCE,
                Operation::Close => HG_OP_CLOSE,
            },
            has_provenance: c_int::from(r.sequence.is_some()),
            creation_generation: r.creation_generation.unwrap_or(0),
            sequence: r.sequence.unwrap_or(0),
        }
    }
}

/// C callback. A non-zero return is treated as a callback failure.
///
/// Runs while the context's lock is held: it must not call any `hg_*`
/// function on the same context.
pub type HgInvalidHandleCallback =
    unsafe extern "C" fn(report: *const HgInvalidHandleReport, user_data: *mut c_void) -> c_int;

#[derive(Debug, Error)]
#[error("invalid-handle callback returned {0}")]
struct CallbackStatus(c_int);

/// Callback plus its user data. The pointer is stored as an integer so the
/// hook is `Send`; the C caller guarantees it outlives the registration.
struct ForeignHook {
    callback: HgInvalidHandleCallback,
    user_data: usize,
}

impl ForeignHook {
    fn call(&self, report: &InvalidHandleUse) -> Result<(), CallbackStatus> {
        let c_report = HgInvalidHandleReport::from(report);
        // SAFETY: `callback` was supplied by the C caller together with
        // `user_data`; the report pointer is valid for the call's duration.
        let rc = unsafe { (self.callback)(&c_report, self.user_data as *mut c_void) };
        if rc == 0 { Ok(()) } else { Err(CallbackStatus(rc)) }
    }
}

const fn classification_code(result: ValidationResult) -> c_int {
    match result {
        ValidationResult::Valid => HG_VALID,
        ValidationResult::UseAfterClose => HG_USE_AFTER_CLOSE,
        ValidationResult::Unknown => HG_UNKNOWN,
    }
}

/// Create a debug context. A negative size clamps to zero.
#[unsafe(no_mangle)]
pub extern "C" fn hg_debug_context_new(closed_handles_queue_max_size: i64) -> *mut HgDebugContext {
    let config = DebugConfig::from_env().with_closed_handles_queue_max_size(
        handlegate_membrane::config::clamp_capacity(closed_handles_queue_max_size),
    );
    Box::into_raw(Box::new(HgDebugContext {
        abi: DebugAbi::new(config),
    }))
}

/// Tear down a context created by [`hg_debug_context_new`].
///
/// # Safety
/// `ctx` must be null or a pointer returned by `hg_debug_context_new` that has
/// not been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_debug_context_free(ctx: *mut HgDebugContext) {
    if ctx.is_null() {
        return;
    }
    // SAFETY: caller contract above; ownership returns to Rust exactly once.
    let ctx = unsafe { Box::from_raw(ctx) };
    let _ = ctx.abi.teardown();
}

/// # Safety
/// `ctx` must be null or a live context pointer.
unsafe fn context<'a>(ctx: *const HgDebugContext) -> Option<&'a HgDebugContext> {
    // SAFETY: forwarded caller contract.
    unsafe { ctx.as_ref() }
}

/// Open a handle for `token`. Returns 0 on failure.
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_open(ctx: *const HgDebugContext, token: u64) -> u64 {
    // SAFETY: forwarded caller contract.
    let Some(ctx) = (unsafe { context(ctx) }) else {
        return NULL_HANDLE.raw();
    };
    ctx.abi.open(token).map_or(NULL_HANDLE.raw(), HandleId::raw)
}

/// Close a handle. Returns the classification of the handle at close time
/// (`0` when it was open and is now quarantined).
///
/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_close(ctx: *const HgDebugContext, handle: u64) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(ctx) = (unsafe { context(ctx) }) else {
        return HG_ERROR;
    };
    match ctx.abi.close(HandleId::new(handle)) {
        Ok(CloseOutcome::Closed { .. }) => HG_VALID,
        Ok(CloseOutcome::Rejected(result)) => classification_code(result),
        Err(_) => HG_ERROR,
    }
}

/// Validate and dereference a handle. On success writes the token to
/// `out_token` (if non-null).
///
/// # Safety
/// `ctx` must be null or a live context pointer; `out_token` must be null or
/// writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_deref(
    ctx: *const HgDebugContext,
    handle: u64,
    out_token: *mut u64,
) -> c_int {
    // SAFETY: forwarded caller contract.
    let Some(ctx) = (unsafe { context(ctx) }) else {
        return HG_ERROR;
    };
    let id = HandleId::new(handle);
    match ctx.abi.with_referent(id, |token| *token) {
        Ok(Some(token)) => {
            if !out_token.is_null() {
                // SAFETY: caller guarantees `out_token` is writable.
                unsafe { out_token.write(token) };
            }
            HG_VALID
        }
        Ok(None) => classification_code(ctx.abi.with_context(|c| c.classify(id))),
        Err(_) => HG_ERROR,
    }
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_new_generation(ctx: *const HgDebugContext) -> u64 {
    // SAFETY: forwarded caller contract.
    unsafe { context(ctx) }.map_or(0, |ctx| ctx.abi.new_generation())
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_get_closed_handles_queue_max_size(ctx: *const HgDebugContext) -> i64 {
    // SAFETY: forwarded caller contract.
    unsafe { context(ctx) }.map_or(0, |ctx| {
        i64::try_from(ctx.abi.get_closed_handles_queue_max_size()).unwrap_or(i64::MAX)
    })
}

/// # Safety
/// `ctx` must be null or a live context pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_set_closed_handles_queue_max_size(
    ctx: *const HgDebugContext,
    size: i64,
) {
    // SAFETY: forwarded caller contract.
    if let Some(ctx) = unsafe { context(ctx) } {
        ctx.abi.set_closed_handles_queue_max_size(size);
    }
}

/// Install (or, with a null callback, remove) the invalid-handle callback.
///
/// # Safety
/// `ctx` must be null or a live context pointer. `user_data` must stay valid
/// until the callback is replaced or the context is freed. The callback runs
/// with the context locked and must not call back into any `hg_*` function
/// on the same context; the lock is not re-entrant and such a call deadlocks.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn hg_set_on_invalid_handle(
    ctx: *const HgDebugContext,
    callback: Option<HgInvalidHandleCallback>,
    user_data: *mut c_void,
) {
    // SAFETY: forwarded caller contract.
    let Some(ctx) = (unsafe { context(ctx) }) else {
        return;
    };
    match callback {
        Some(callback) => {
            let hook = ForeignHook {
                callback,
                user_data: user_data as usize,
            };
            ctx.abi
                .set_on_invalid_handle_callback(move |r: &InvalidHandleUse| {
                    hook.call(r).map_err(Into::into)
                });
        }
        None => ctx.abi.clear_on_invalid_handle_callback(),
    }
}
