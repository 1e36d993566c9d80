//! Guest generator error types.

use thiserror::Error;

/// Errors that can occur while generating a guest module.
#[derive(Debug, Error)]
pub enum GuestError {
    /// Two exports were given the same name.
    #[error("duplicate export `{0}`")]
    DuplicateExport(String),

    /// A proxy signature cannot be forwarded.
    #[error("unsupported proxy `{export}`: {reason}")]
    UnsupportedProxy { export: String, reason: String },

    /// The generated module failed validation.
    #[error("WASM validation failed: {0}")]
    ValidationFailed(String),
}

/// Guest generator result type alias.
pub type GuestResult<T> = Result<T, GuestError>;
