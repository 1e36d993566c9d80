//! Generator for small WebAssembly modules that speak the tether bridge ABI.
//!
//! # Exports
//! - `memory`: linear memory (1 page, grows to 256)
//! - `__tether_malloc(size) → ptr`: 8-byte aligned bump allocator
//! - `__tether_realloc(ptr, old, new) → ptr` (unless disabled)
//! - `__tether_free(ptr, size)`: no-op
//! - `grow(pages) → old_pages`, `peek_i32(ptr) → i32`
//! - (optional) `__tether_exn_store(handle)` and `exn_last() → handle`
//! - (optional) `__indirect_function_table` and `closure_drop(handle, a, b)`
//! - one export per proxy, forwarding its parameters to an import
//!
//! # Imports
//! - (with closures) `harness.invoked(a, b, arg) → handle`,
//!   `harness.destroyed(a, b)`, `__tether.cb_drop(handle) → i32`
//! - the import behind each proxy

pub mod builder;
pub mod error;
pub mod runtime;
pub mod types;

pub use builder::{GuestBuilder, Proxy};
pub use error::{GuestError, GuestResult};
