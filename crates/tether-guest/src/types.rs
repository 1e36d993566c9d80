//! Layout constants shared by the guest generator and its users.
//!
//! ```text
//!  linear memory
//!  0 ........ HEAP_START ................................ memory.size
//!  [ reserved ][ bump heap → (8-byte aligned, grows memory on demand) ]
//! ```
//!
//! # Function table
//!
//! | Slot | Entry                                   |
//! |------|-----------------------------------------|
//! | 0    | empty                                   |
//! | 1    | `closure_invoke(a, b, arg) -> handle`   |
//! | 2    | `closure_dtor(a, b)`                    |

// ── Globals ──────────────────────────────────────────────────────────────────
// (order must match the global section emission in builder.rs)

/// Bump pointer: next free byte.
pub const GLOBAL_HEAP_PTR: u32 = 0;
/// Exception handle stored by `__tether_exn_store`.
pub const GLOBAL_EXN_SLOT: u32 = 1;

// ── Function table ───────────────────────────────────────────────────────────

pub const INVOKE_SLOT: u32 = 1;
pub const DTOR_SLOT: u32 = 2;
pub const TABLE_SIZE: u64 = 3;

// ── Harness imports ──────────────────────────────────────────────────────────

/// Namespace of the hooks a closure-enabled guest reports to.
pub const HARNESS: &str = "harness";
/// `harness.invoked(a, b, arg) -> handle`: the closure body.
pub const HARNESS_INVOKED: &str = "invoked";
/// `harness.destroyed(a, b)`: the closure destructor.
pub const HARNESS_DESTROYED: &str = "destroyed";

// ── Extra exports ────────────────────────────────────────────────────────────

/// `exn_last() -> handle`: read and clear the stored exception.
pub const EXPORT_EXN_LAST: &str = "exn_last";
/// `grow(pages) -> old_pages`
pub const EXPORT_GROW: &str = "grow";
/// `closure_drop(handle, a, b)`: release the module's reference and run the
/// destructor if the host reports it was the last one.
pub const EXPORT_CLOSURE_DROP: &str = "closure_drop";
/// `peek_i32(ptr) -> i32`
pub const EXPORT_PEEK_I32: &str = "peek_i32";

// ── Memory ───────────────────────────────────────────────────────────────────

pub const PAGE_SIZE: u32 = 65536;
pub const INITIAL_MEMORY_PAGES: u64 = 1;
pub const MAX_MEMORY_PAGES: u64 = 256;
/// Addresses below this are never handed out, so 0 is never a valid pointer.
pub const HEAP_START: u32 = 1024;
pub const ALLOC_ALIGN: u32 = 8;

// ── Custom section ───────────────────────────────────────────────────────────

pub const CUSTOM_SECTION_NAME: &str = "tether-guest";
pub const GENERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");
