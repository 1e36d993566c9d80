//! Import and export names shared by the host and guest modules.
//!
//! The intrinsic namespace is configurable on the host; [`INTRINSICS`] is the
//! default every generated guest uses.

/// Default import namespace for bridge intrinsics.
pub const INTRINSICS: &str = "__tether";

/// Default import namespace for the host catalogue (graphics, DOM, timers).
pub const CATALOG: &str = "host";

// ── Intrinsic imports ────────────────────────────────────────────────────────

/// `object_drop_ref(handle)`
pub const OBJECT_DROP_REF: &str = "object_drop_ref";
/// `object_clone_ref(handle) -> handle`
pub const OBJECT_CLONE_REF: &str = "object_clone_ref";
/// `string_new(ptr, len) -> handle`
pub const STRING_NEW: &str = "string_new";
/// `number_new(value: f64) -> handle`
pub const NUMBER_NEW: &str = "number_new";
/// `number_get(retptr, handle)`: writes `[flag: i32, _pad, value: f64]`.
pub const NUMBER_GET: &str = "number_get";
/// `string_get(retptr, handle)`: writes `[ptr: i32, len: i32]`.
pub const STRING_GET: &str = "string_get";
/// `boolean_get(handle) -> i32`: 1 true, 0 false, 2 not a boolean.
pub const BOOLEAN_GET: &str = "boolean_get";
pub const IS_UNDEFINED: &str = "is_undefined";
pub const IS_NULL: &str = "is_null";
pub const IS_OBJECT: &str = "is_object";
pub const IS_STRING: &str = "is_string";
pub const IS_FUNCTION: &str = "is_function";
/// `debug_string(retptr, handle)`: writes `[ptr: i32, len: i32]`.
pub const DEBUG_STRING: &str = "debug_string";
/// `error_new(ptr, len) -> handle`
pub const ERROR_NEW: &str = "error_new";
/// `throw(ptr, len)`: aborts the current call with a message.
pub const THROW: &str = "throw";
/// `rethrow(handle)`: re-raises a host value.
pub const RETHROW: &str = "rethrow";
/// `exn_take() -> handle`: read-and-clear the pending exception slot.
pub const EXN_TAKE: &str = "exn_take";
/// `cb_drop(handle) -> i32`: 1 when the module must dispose the closure.
pub const CB_DROP: &str = "cb_drop";
/// `closure_new(a, b, dtor_slot, invoke_slot) -> handle`
pub const CLOSURE_NEW: &str = "closure_new";
/// `log(level, ptr, len)`
pub const LOG: &str = "log";

// ── Module exports ───────────────────────────────────────────────────────────

pub const EXPORT_MEMORY: &str = "memory";
/// `malloc(size) -> ptr`
pub const EXPORT_MALLOC: &str = "__tether_malloc";
/// `realloc(ptr, old_size, new_size) -> ptr`
pub const EXPORT_REALLOC: &str = "__tether_realloc";
/// `free(ptr, size)`
pub const EXPORT_FREE: &str = "__tether_free";
/// `exn_store(handle)`
pub const EXPORT_EXN_STORE: &str = "__tether_exn_store";
/// Function table holding closure invoke and destructor entries.
pub const EXPORT_TABLE: &str = "__indirect_function_table";

// ── Log levels for the `log` import ──────────────────────────────────────────

pub const LOG_TRACE: i32 = 0;
pub const LOG_DEBUG: i32 = 1;
pub const LOG_INFO: i32 = 2;
pub const LOG_WARN: i32 = 3;
pub const LOG_ERROR: i32 = 4;
