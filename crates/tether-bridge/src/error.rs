//! Bridge error types.

use tether_types::{Handle, HostValue};
use thiserror::Error;

/// Errors raised while moving values or control across the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BridgeError {
    /// Bytes handed over as a string are not valid UTF-8.
    #[error("invalid UTF-8 at {ptr}+{len} (valid up to byte {valid_up_to})")]
    Decode {
        ptr: u32,
        len: u32,
        valid_up_to: usize,
    },

    /// A value crossing the boundary is not of the asserted host type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// The free list threaded through the handle table is broken. Indicates a
    /// double free or use-after-free of a handle.
    #[error("corrupt handle table at {handle}: {reason}")]
    CorruptHandleTable { handle: Handle, reason: &'static str },

    /// A handle that is out of range or refers to a free slot.
    #[error("invalid handle {0}")]
    InvalidHandle(Handle),

    /// A wrapped host call threw; the thrown value is stored under `handle`.
    #[error("host exception {handle}: {message}")]
    HostThrow { handle: Handle, message: String },

    /// A host call that must never throw did.
    #[error("imported function `{import}` threw without being marked as catching: {message}")]
    UnhandledHostThrow { import: String, message: String },

    /// A pointer range lies outside linear memory.
    #[error("memory access {ptr}+{len} out of bounds (memory is {memory_len} bytes)")]
    OutOfBounds {
        ptr: u64,
        len: u64,
        memory_len: usize,
    },

    /// The closure registration was already disposed.
    #[error("closure invoked after it was destroyed")]
    ClosureDisposed,

    /// The module aborted the call through the `throw` intrinsic.
    #[error("module aborted: {0}")]
    GuestAbort(String),

    /// A required export is missing or has the wrong signature.
    #[error("missing export `{0}`")]
    MissingExport(String),

    /// Import registration failed.
    #[error("link error: {0}")]
    Link(String),

    /// The module binary could not be fetched or compiled.
    #[error("load error: {0}")]
    Load(String),

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Any other trap or engine error.
    #[error("wasm error: {0}")]
    Wasm(String),
}

impl BridgeError {
    /// A type mismatch against the value actually seen.
    pub fn mismatch(expected: &'static str, found: &HostValue) -> Self {
        Self::TypeMismatch {
            expected,
            found: found.type_name(),
        }
    }

    /// Recover a bridge error from an engine error, wrapping anything else.
    pub fn from_wasm(err: wasmi::Error) -> Self {
        match err.downcast_ref::<BridgeError>() {
            Some(bridge) => bridge.clone(),
            None => Self::Wasm(err.to_string()),
        }
    }

    /// Convert into an engine error so a host import can trap with it.
    pub fn into_trap(self) -> wasmi::Error {
        wasmi::Error::host(self)
    }

    /// Only `HostThrow` may be caught and handled by the module.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::HostThrow { .. })
    }
}

impl wasmi::core::HostError for BridgeError {}

impl From<wasmi::Error> for BridgeError {
    fn from(err: wasmi::Error) -> Self {
        Self::from_wasm(err)
    }
}

/// Bridge result type alias.
pub type BridgeResult<T> = Result<T, BridgeError>;
