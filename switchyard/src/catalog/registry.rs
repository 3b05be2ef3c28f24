//! Manifest Catalog
//!
//! In-memory index of loaded manifests with name resolution and hot-reload
//! support.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use switchyard_protocol::{name_path, name_type};

use super::loader;
use super::types::Manifest;
use super::CatalogError;
use crate::resolver::{ResolvedName, Resolver};

/// Names of this type resolve to an executable at their path even without a
/// manifest.
const EXE_NAME_TYPE: &str = "exe";

/// What a name resolves to
#[derive(Debug, Clone)]
struct CatalogEntry {
    manifest: Arc<Manifest>,
    /// Package serving the name (the manifest's own name unless hosted).
    package_name: String,
    package_path: Option<PathBuf>,
}

/// In-memory manifest catalog with name lookup
pub struct ManifestCatalog {
    manifest_dir: PathBuf,
    /// Service name → entry, covering packages and their hosted applications
    entries: RwLock<HashMap<String, CatalogEntry>>,
}

impl ManifestCatalog {
    pub fn new(manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            manifest_dir: manifest_dir.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn manifest_dir(&self) -> &Path {
        &self.manifest_dir
    }

    /// Load manifests from the catalog directory, replacing the index
    pub async fn load_from_disk(&self) -> Result<usize, CatalogError> {
        let manifests = loader::load_manifests(&self.manifest_dir)?;

        // Later manifests override earlier ones
        let mut entries = HashMap::new();
        for manifest in manifests {
            index_manifest(&mut entries, manifest);
        }

        let count = entries.len();
        *self.entries.write().await = entries;

        info!("Service catalog initialized: {} names", count);
        Ok(count)
    }

    /// Register a manifest directly, bypassing the filesystem
    pub async fn insert_manifest(&self, manifest: Manifest) -> Result<(), CatalogError> {
        manifest.validate().map_err(CatalogError::Invalid)?;
        let mut entries = self.entries.write().await;
        index_manifest(&mut entries, manifest);
        Ok(())
    }

    /// List all registered manifests (packages and hosted applications)
    pub async fn list_manifests(&self) -> Vec<Arc<Manifest>> {
        let entries = self.entries.read().await;
        entries.values().map(|entry| Arc::clone(&entry.manifest)).collect()
    }

    /// Get the manifest describing `name`
    pub async fn get_manifest(&self, name: &str) -> Option<Arc<Manifest>> {
        let entries = self.entries.read().await;
        entries.get(name).map(|entry| Arc::clone(&entry.manifest))
    }

    /// Start filesystem watcher for hot-reload
    pub async fn start_watcher(self: Arc<Self>) -> Result<(), CatalogError> {
        use notify::{Event, RecursiveMode, Watcher};

        if !self.manifest_dir.exists() {
            std::fs::create_dir_all(&self.manifest_dir).map_err(|source| CatalogError::Io {
                path: self.manifest_dir.clone(),
                source,
            })?;
        }

        info!("Starting manifest watcher on {:?}", self.manifest_dir);

        let (tx, mut rx) = tokio::sync::mpsc::channel::<Event>(100);

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.blocking_send(event);
            }
        })?;

        watcher.watch(&self.manifest_dir, RecursiveMode::Recursive)?;

        tokio::spawn(async move {
            // Keep watcher alive
            let _watcher = watcher;

            while let Some(event) = rx.recv().await {
                debug!("Manifest filesystem event: {:?}", event);

                // Debounce: wait a bit before reloading
                tokio::time::sleep(Duration::from_millis(200)).await;
                while rx.try_recv().is_ok() {}

                info!("Manifest change detected, reloading...");
                if let Err(e) = self.load_from_disk().await {
                    warn!("Failed to reload manifests: {}", e);
                }
            }
        });

        Ok(())
    }
}

fn index_manifest(entries: &mut HashMap<String, CatalogEntry>, manifest: Manifest) {
    let package_name = manifest.name.clone();
    let package_path = manifest.package.clone();

    for app in &manifest.applications {
        insert_entry(
            entries,
            CatalogEntry {
                manifest: Arc::new(app.clone()),
                package_name: package_name.clone(),
                package_path: package_path.clone(),
            },
        );
    }

    insert_entry(
        entries,
        CatalogEntry {
            manifest: Arc::new(manifest),
            package_name,
            package_path,
        },
    );
}

fn insert_entry(entries: &mut HashMap<String, CatalogEntry>, entry: CatalogEntry) {
    let name = entry.manifest.name.clone();
    if entries.insert(name.clone(), entry).is_some() {
        warn!("Manifest for {} overrides an earlier one", name);
    }
}

#[async_trait]
impl Resolver for ManifestCatalog {
    async fn resolve_name(&self, name: &str) -> ResolvedName {
        let entries = self.entries.read().await;

        if let Some(entry) = entries.get(name) {
            let resolved_instance = entry
                .manifest
                .instance
                .clone()
                .unwrap_or_else(|| name_path(name).to_string());
            debug!("Resolved {} to package {}", name, entry.package_name);
            return ResolvedName {
                resolved_name: entry.package_name.clone(),
                resolved_instance,
                capabilities: Some(entry.manifest.capabilities.clone().unwrap_or_default()),
                package_path: entry.package_path.clone(),
            };
        }

        let mut resolved = ResolvedName::unresolved(name);
        if name_type(name) == EXE_NAME_TYPE {
            resolved.package_path = Some(PathBuf::from(name_path(name)));
        } else {
            debug!("No manifest for {}", name);
        }
        resolved
    }
}
