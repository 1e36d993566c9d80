//! Shared types for the tether bridge.
//!
//! This crate defines the vocabulary both sides of the boundary agree on:
//! the [`Handle`] newtype with its reserved sentinel prefix, the dynamic
//! [`HostValue`] model for objects owned by the host, and the [`abi`] name
//! table used by the host when linking imports and by guest generators when
//! emitting them.

pub mod abi;
mod handle;
mod value;

pub use handle::Handle;
pub use value::{HostError, HostObject, HostValue, NativeFn};
