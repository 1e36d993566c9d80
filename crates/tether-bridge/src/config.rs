//! Bridge configuration.

use serde::Deserialize;
use tether_types::abi;

use crate::error::{BridgeError, BridgeResult};

/// Names of the exports the bridge resolves on the module.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportNames {
    pub memory: String,
    pub malloc: String,
    pub realloc: String,
    pub free: String,
    pub exn_store: String,
    pub table: String,
}

impl Default for ExportNames {
    fn default() -> Self {
        Self {
            memory: abi::EXPORT_MEMORY.to_string(),
            malloc: abi::EXPORT_MALLOC.to_string(),
            realloc: abi::EXPORT_REALLOC.to_string(),
            free: abi::EXPORT_FREE.to_string(),
            exn_store: abi::EXPORT_EXN_STORE.to_string(),
            table: abi::EXPORT_TABLE.to_string(),
        }
    }
}

/// Bridge-wide settings, fixed for the lifetime of a module instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Import namespace of the bridge intrinsics.
    pub intrinsics_namespace: String,
    /// Import namespace of the host catalogue.
    pub catalog_namespace: String,
    /// Register the host catalogue imports.
    pub catalog: bool,
    pub exports: ExportNames,
    /// Slots preallocated in the handle table beyond the sentinels.
    pub initial_heap_capacity: usize,
    /// Content type required by the streaming load path.
    pub expected_content_type: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            intrinsics_namespace: abi::INTRINSICS.to_string(),
            catalog_namespace: abi::CATALOG.to_string(),
            catalog: true,
            exports: ExportNames::default(),
            initial_heap_capacity: 128,
            expected_content_type: "application/wasm".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> BridgeResult<Self> {
        serde_json::from_str(json).map_err(|e| BridgeError::Config(e.to_string()))
    }
}
