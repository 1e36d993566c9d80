//! Host side of the tether bridge.
//!
//! A WebAssembly module cannot hold host objects, so every host value it
//! touches lives in a [`heap::HandleTable`] and crosses the boundary as an
//! integer [`Handle`]. This crate provides:
//!
//! - the handle table and the [`views`] cache over linear memory,
//! - the [`marshal`] layer for strings, buffers and out-parameter pairs,
//! - [`closure`] registrations with reference-counted destruction and the
//!   [`trampoline`] that re-enters the module through them,
//! - the [`relay`] that turns host exceptions into a pending-exception slot,
//! - the [`intrinsics`] import namespace and a representative host
//!   [`catalog`],
//! - the [`loader`], [`config`], and the [`Bridge`] facade tying it together.
//!
//! ```ignore
//! let mut bridge = Bridge::<()>::builder(BridgeConfig::default()).instantiate(wasm_bytes)?;
//! let greeting = bridge.alloc("hello")?;
//! bridge.call::<u32, ()>("greet", greeting.0)?;
//! ```

mod bridge;
pub mod catalog;
pub mod closure;
pub mod config;
pub mod error;
pub mod heap;
pub mod intrinsics;
pub mod loader;
pub mod marshal;
pub mod relay;
pub mod state;
pub mod trampoline;
pub mod views;

pub use bridge::{Bridge, BridgeBuilder};
pub use config::{BridgeConfig, ExportNames};
pub use error::{BridgeError, BridgeResult};
pub use loader::{LoadPath, ModuleSource, Response};
pub use relay::{Fault, HostResult, Policy};
pub use state::{GuestExports, HostState};
pub use tether_types::{abi, Handle, HostError, HostObject, HostValue, NativeFn};
