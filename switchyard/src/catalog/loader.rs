//! Manifest Loader
//!
//! Scans manifest directories, parses JSON, validates, returns loaded manifests.

use std::fs;
use std::path::Path;
use tracing::{info, warn};

use super::types::Manifest;
use super::CatalogError;

/// Largest manifest file accepted.
const MAX_MANIFEST_BYTES: u64 = 1_000_000;

/// Load all manifests from a directory tree (recursive)
pub fn load_manifests(base_dir: &Path) -> Result<Vec<Manifest>, CatalogError> {
    let mut manifests = Vec::new();

    if !base_dir.exists() {
        info!("Manifest directory does not exist: {:?}", base_dir);
        return Ok(manifests);
    }

    load_manifests_recursive(base_dir, &mut manifests)?;

    info!("Loaded {} manifests from {:?}", manifests.len(), base_dir);
    Ok(manifests)
}

fn load_manifests_recursive(dir: &Path, manifests: &mut Vec<Manifest>) -> Result<(), CatalogError> {
    let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        // Skip dotfiles and temp files
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if name.starts_with('.') || name.ends_with(".tmp") || name.ends_with(".swp") {
                continue;
            }
        }

        if path.is_dir() {
            load_manifests_recursive(&path, manifests)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("json") {
            match load_manifest_file(&path) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => {
                    warn!("Failed to load manifest {:?}: {}", path, e);
                }
            }
        }
    }

    Ok(())
}

/// Parse and validate one manifest file, anchoring a relative package path to
/// the file's directory.
pub fn load_manifest_file(path: &Path) -> Result<Manifest, CatalogError> {
    let metadata = fs::metadata(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if metadata.len() > MAX_MANIFEST_BYTES {
        return Err(CatalogError::TooLarge(path.to_path_buf()));
    }

    let content = fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let mut manifest: Manifest = serde_json::from_str(&content).map_err(|source| CatalogError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    manifest.validate().map_err(CatalogError::Invalid)?;

    if let (Some(package), Some(dir)) = (manifest.package.as_ref(), path.parent()) {
        if package.is_relative() {
            manifest.package = Some(dir.join(package));
        }
    }

    info!("Loaded manifest: {}", manifest.name);
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = load_manifests(&dir.path().join("nope")).unwrap();
        assert!(manifests.is_empty());
    }

    #[test]
    fn test_loads_nested_and_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("core");
        fs::create_dir_all(&nested).unwrap();
        fs::write(
            nested.join("echo.json"),
            r#"{"manifest_version":"1.0.0","name":"svc:echo","package":"echo-bin"}"#,
        )
        .unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();
        fs::write(dir.path().join(".hidden.json"), "{").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let manifests = load_manifests(dir.path()).unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].package, Some(nested.join("echo-bin")));
    }

    #[test]
    fn test_absolute_package_path_kept() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("tool.json");
        fs::write(
            &file,
            r#"{"manifest_version":"1.0.0","name":"svc:tool","package":"/usr/bin/tool"}"#,
        )
        .unwrap();
        let manifest = load_manifest_file(&file).unwrap();
        assert_eq!(manifest.package, Some("/usr/bin/tool".into()));
    }
}
