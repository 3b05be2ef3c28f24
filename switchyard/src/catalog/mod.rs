//! Service Catalog
//!
//! Discovers, validates, loads, and hot-reloads service manifests from disk,
//! and resolves requested names against them.

pub mod loader;
pub mod registry;
pub mod types;

use std::path::PathBuf;

pub use loader::{load_manifest_file, load_manifests};
pub use registry::ManifestCatalog;
pub use types::{Manifest, MANIFEST_VERSION};

/// Error types for manifest loading
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path:?}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid manifest: {0}")]
    Invalid(String),

    #[error("Manifest too large: {0:?}")]
    TooLarge(PathBuf),

    #[error("Failed to watch manifests: {0}")]
    Watch(#[from] notify::Error),
}
