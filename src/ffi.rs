//! C ABI exposed to the host runtime.
//!
//! Ownership contract: input buffers stay with the caller; every returned
//! string is owned by the callee until the paired `minimact_free_string`.
//! Panics never cross the boundary; they surface as `internal` errors.

use crate::engine::{Engine, EngineConfig};
use crate::error::{Error, FfiResult};
use crate::state_paths::StateMap;
use crate::store::StoreConfig;
use crate::template::ListOperation;
use crate::transform::TRANSFORM_WHITELIST_VERSION;
use crate::validation::Limits;
use crate::wire;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

lazy_static::lazy_static! {
    static ref ENGINES: dashmap::DashMap<usize, Arc<Engine>> = dashmap::DashMap::new();
}

static NEXT_ENGINE_ID: AtomicUsize = AtomicUsize::new(1);

/// Opaque handle to an engine instance.
pub type EngineHandle = usize;

unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

fn string_out(s: String) -> *mut c_char {
    CString::new(s)
        .unwrap_or_else(|_| CString::new("{\"kind\":\"internal\",\"message\":\"NUL in output\"}").unwrap())
        .into_raw()
}

fn error_out(err: &Error) -> *mut c_char {
    string_out(wire::encode_error(err))
}

fn internal_out(message: &str) -> *mut c_char {
    error_out(&Error::Internal(message.to_string()))
}

fn engine(handle: EngineHandle) -> Option<Arc<Engine>> {
    ENGINES.get(&handle).map(|e| Arc::clone(e.value()))
}

/// Create an engine with default configuration.
#[no_mangle]
pub extern "C" fn minimact_engine_new() -> EngineHandle {
    let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::SeqCst);
    ENGINES.insert(id, Arc::new(Engine::default()));
    id
}

/// Create an engine with host-supplied bounds and store caps.
#[no_mangle]
pub extern "C" fn minimact_engine_new_with_config(
    max_depth: usize,
    max_tree_size: usize,
    max_children: usize,
    store_max_entries: usize,
    store_max_bytes: usize,
) -> EngineHandle {
    let config = EngineConfig {
        limits: Limits {
            max_depth,
            max_tree_size,
            max_children,
            ..Limits::default()
        },
        store: StoreConfig {
            max_entries: store_max_entries,
            max_bytes: store_max_bytes,
            ..StoreConfig::default()
        },
        ..EngineConfig::default()
    };
    let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::SeqCst);
    ENGINES.insert(id, Arc::new(Engine::new(config)));
    id
}

#[no_mangle]
pub extern "C" fn minimact_engine_destroy(handle: EngineHandle) -> FfiResult {
    if ENGINES.remove(&handle).is_some() {
        FfiResult::success()
    } else {
        FfiResult::error(&Error::NotFound(format!("engine handle {handle}")))
    }
}

/// Diff two VNode trees; returns patches JSON or a tagged error object.
///
/// # Safety
/// - `old_json` and `new_json` must be valid NUL-terminated UTF-8 strings.
/// - The returned pointer must be released with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_reconcile(
    handle: EngineHandle,
    old_json: *const c_char,
    new_json: *const c_char,
) -> *mut c_char {
    let old_str = cstr(old_json);
    let new_str = cstr(new_json);
    let result = catch_unwind(AssertUnwindSafe(move || {
        let engine = match engine(handle) {
            Some(e) => e,
            None => return error_out(&Error::NotFound(format!("engine handle {handle}"))),
        };
        let old_str = match old_str {
            Some(s) => s,
            None => return error_out(&Error::Serialization("old tree pointer".to_string())),
        };
        let new_str = match new_str {
            Some(s) => s,
            None => return error_out(&Error::Serialization("new tree pointer".to_string())),
        };

        let old_node = match wire::decode_vnode(old_str, engine.limits()) {
            Ok(n) => n,
            Err(e) => return error_out(&e),
        };
        let new_node = match wire::decode_vnode(new_str, engine.limits()) {
            Ok(n) => n,
            Err(e) => return error_out(&e),
        };

        match engine
            .reconcile(&old_node, &new_node)
            .and_then(|patches| wire::encode_patches(&patches))
        {
            Ok(json) => string_out(json),
            Err(e) => error_out(&e),
        }
    }));
    result.unwrap_or_else(|_| internal_out("panic in minimact_reconcile"))
}

/// Feed an observed transition into a component's template store; returns
/// the template deltas as JSON or a tagged error object. `op_hint_json`
/// may be null.
///
/// # Safety
/// - All non-null pointers must be valid NUL-terminated UTF-8 strings.
/// - The returned pointer must be released with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_extract(
    handle: EngineHandle,
    component_id: *const c_char,
    old_state_json: *const c_char,
    new_state_json: *const c_char,
    patches_json: *const c_char,
    op_hint_json: *const c_char,
) -> *mut c_char {
    let component_str = cstr(component_id);
    let old_state_str = cstr(old_state_json);
    let new_state_str = cstr(new_state_json);
    let patches_str = cstr(patches_json);
    let op_hint_str = cstr(op_hint_json);
    let result = catch_unwind(AssertUnwindSafe(move || {
        let engine = match engine(handle) {
            Some(e) => e,
            None => return error_out(&Error::NotFound(format!("engine handle {handle}"))),
        };
        let component = match component_str {
            Some(s) => s,
            None => return error_out(&Error::Serialization("component id pointer".to_string())),
        };
        let (old_state, new_state) = match (
            old_state_str.map(serde_json::from_str::<StateMap>),
            new_state_str.map(serde_json::from_str::<StateMap>),
        ) {
            (Some(Ok(old)), Some(Ok(new))) => (old, new),
            (Some(Err(e)), _) | (_, Some(Err(e))) => return error_out(&e.into()),
            _ => return error_out(&Error::Serialization("state pointer".to_string())),
        };
        let patches = match patches_str
            .ok_or_else(|| Error::Serialization("patches pointer".to_string()))
            .and_then(|s| wire::decode_patches(s, engine.limits()))
        {
            Ok(p) => p,
            Err(e) => return error_out(&e),
        };
        let op_hint: Option<ListOperation> = match op_hint_str {
            Some(s) => match serde_json::from_str(s) {
                Ok(hint) => Some(hint),
                Err(e) => return error_out(&e.into()),
            },
            None => None,
        };

        match engine
            .extract(component, &old_state, &new_state, &patches, op_hint)
            .and_then(|deltas| serde_json::to_string(&deltas).map_err(Error::from))
        {
            Ok(json) => string_out(json),
            Err(e) => error_out(&e),
        }
    }));
    result.unwrap_or_else(|_| internal_out("panic in minimact_extract"))
}

/// Predict patches for a future state delta. Returns hint JSON, null when
/// no prediction is available, or a tagged error object for malformed
/// input.
///
/// # Safety
/// - All pointers must be valid NUL-terminated UTF-8 strings.
/// - A non-null return must be released with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_predict(
    handle: EngineHandle,
    component_id: *const c_char,
    delta_json: *const c_char,
) -> *mut c_char {
    let component_str = cstr(component_id);
    let delta_str = cstr(delta_json);
    let result = catch_unwind(AssertUnwindSafe(move || {
        let engine = match engine(handle) {
            Some(e) => e,
            None => return error_out(&Error::NotFound(format!("engine handle {handle}"))),
        };
        let component = match component_str {
            Some(s) => s,
            None => return error_out(&Error::Serialization("component id pointer".to_string())),
        };
        let delta: StateMap = match delta_str.map(serde_json::from_str) {
            Some(Ok(d)) => d,
            Some(Err(e)) => return error_out(&e.into()),
            None => return error_out(&Error::Serialization("delta pointer".to_string())),
        };

        match engine.predict(component, &delta) {
            Some(hint) => match wire::encode_hint(&hint) {
                Ok(json) => string_out(json),
                Err(e) => error_out(&e),
            },
            None => std::ptr::null_mut(),
        }
    }));
    result.unwrap_or_else(|_| internal_out("panic in minimact_predict"))
}

/// Drop a component's template store.
///
/// # Safety
/// - `component_id` must be a valid NUL-terminated UTF-8 string.
#[no_mangle]
pub unsafe extern "C" fn minimact_invalidate(
    handle: EngineHandle,
    component_id: *const c_char,
) -> FfiResult {
    let component_str = cstr(component_id);
    let result = catch_unwind(AssertUnwindSafe(move || {
        let engine = match engine(handle) {
            Some(e) => e,
            None => return FfiResult::error(&Error::NotFound(format!("engine handle {handle}"))),
        };
        match component_str {
            Some(component) => {
                engine.invalidate(component);
                FfiResult::success()
            }
            None => FfiResult::error(&Error::Serialization("component id pointer".to_string())),
        }
    }));
    result.unwrap_or_else(|_| FfiResult::error_str("panic in minimact_invalidate"))
}

/// Serialize the global metrics counters.
///
/// # Safety
/// - The returned pointer must be released with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_metrics_snapshot() -> *mut c_char {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let snapshot = crate::metrics::METRICS.snapshot();
        match serde_json::to_string(&snapshot) {
            Ok(json) => string_out(json),
            Err(e) => error_out(&Error::from(e)),
        }
    }));
    result.unwrap_or_else(|_| internal_out("panic in minimact_metrics_snapshot"))
}

#[no_mangle]
pub extern "C" fn minimact_metrics_reset() {
    crate::metrics::METRICS.reset();
}

/// Version of the transform whitelist compiled into this engine.
#[no_mangle]
pub extern "C" fn minimact_transform_whitelist_version() -> u32 {
    TRANSFORM_WHITELIST_VERSION
}

#[no_mangle]
pub extern "C" fn minimact_logging_enable() {
    crate::logging::enable_logging();
}

#[no_mangle]
pub extern "C" fn minimact_logging_disable() {
    crate::logging::disable_logging();
}

#[no_mangle]
pub extern "C" fn minimact_logging_set_level(level: u32) {
    crate::logging::set_log_level(crate::logging::LogLevel::from(level));
}

/// # Safety
/// - The returned pointer must be released with `minimact_free_string`.
#[no_mangle]
pub unsafe extern "C" fn minimact_logging_get_logs() -> *mut c_char {
    string_out(crate::logging::get_logs_json())
}

#[no_mangle]
pub extern "C" fn minimact_logging_clear() {
    crate::logging::clear_logs();
}

/// Release a string returned by any minimact function.
///
/// # Safety
/// - `ptr` must have been returned by a minimact function and not freed
///   already.
#[no_mangle]
pub unsafe extern "C" fn minimact_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Release an error message carried by an `FfiResult`.
///
/// # Safety
/// - `ptr` must be the `message` field of an `FfiResult`.
#[no_mangle]
pub unsafe extern "C" fn minimact_free_error(ptr: *mut c_char) {
    minimact_free_string(ptr);
}
