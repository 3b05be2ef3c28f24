//! Name Resolution
//!
//! The broker asks a resolver to turn a requested service name into the
//! package that provides it, that service's capabilities and where the package
//! lives on disk.

use std::path::PathBuf;

use async_trait::async_trait;
use switchyard_protocol::{name_path, CapabilitySpec};

/// Result of resolving one name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedName {
    /// Package name that provides the service; differs from the requested
    /// name for services hosted inside another package.
    pub resolved_name: String,
    pub resolved_instance: String,
    /// `None` when no manifest describes the name.
    pub capabilities: Option<CapabilitySpec>,
    pub package_path: Option<PathBuf>,
}

impl ResolvedName {
    /// Resolution for a name nothing knows about.
    pub fn unresolved(name: &str) -> Self {
        Self {
            resolved_name: name.to_string(),
            resolved_instance: name_path(name).to_string(),
            capabilities: None,
            package_path: None,
        }
    }
}

/// Asynchronous name → package resolver
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Completes exactly once per call; completion order across calls is
    /// unspecified.
    async fn resolve_name(&self, name: &str) -> ResolvedName;
}
