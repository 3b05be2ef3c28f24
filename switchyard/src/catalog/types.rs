//! Manifest Types
//!
//! Rust structs matching the service manifest JSON schema v1.0.0.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

use switchyard_protocol::{is_valid_name, CapabilitySpec};

/// Manifest schema version
pub const MANIFEST_VERSION: &str = "1.0.0";

/// Service manifest
///
/// A manifest with a `package` path is a package. Its `applications` are
/// services hosted inside that package; they resolve to the package's name
/// and package path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub manifest_version: String,
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Instance qualifier the service runs under by default.
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub capabilities: Option<CapabilitySpec>,
    /// Package location; relative paths are resolved against the
    /// manifest's directory when loaded.
    #[serde(default)]
    pub package: Option<PathBuf>,
    #[serde(default)]
    pub applications: Vec<Manifest>,
}

impl Manifest {
    /// Validate manifest structure
    pub fn validate(&self) -> Result<(), String> {
        if self.manifest_version != MANIFEST_VERSION {
            return Err(format!(
                "Unsupported manifest version: {} (expected {})",
                self.manifest_version, MANIFEST_VERSION
            ));
        }

        if !is_valid_name(&self.name) {
            return Err(format!("Invalid service name: {}", self.name));
        }

        if matches!(self.instance.as_deref(), Some("")) {
            return Err(format!("Empty instance name in manifest: {}", self.name));
        }

        let mut seen = HashSet::new();
        seen.insert(self.name.as_str());
        for app in &self.applications {
            if !is_valid_name(&app.name) {
                return Err(format!("Invalid application name: {}", app.name));
            }
            if !seen.insert(app.name.as_str()) {
                return Err(format!("Duplicate application name: {}", app.name));
            }
            if !app.applications.is_empty() {
                return Err(format!(
                    "Application {} cannot host further applications",
                    app.name
                ));
            }
            if app.package.is_some() {
                return Err(format!(
                    "Application {} is served by package {} and cannot name a package path",
                    app.name, self.name
                ));
            }
        }

        if !self.applications.is_empty() && self.package.is_none() {
            return Err(format!(
                "Package {} hosts applications but has no package path",
                self.name
            ));
        }

        Ok(())
    }
}
