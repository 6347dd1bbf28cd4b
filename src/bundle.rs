//! Manifest bundles shipped next to the binary
//!
//! Layout of a manifests directory:
//!
//! ```text
//! manifests/
//!   crds/*.yaml          -> one CRD bundle
//!   cert-manager.yaml    -> one controller bundle, after the CRDs
//! ```

use anyhow::{Context, Result};
use provision::{ApiKind, ResourceDocument, ResourceRef};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const CRD_BUNDLE: &str = "cert-manager-crds";
pub const CONTROLLER_BUNDLE: &str = "cert-manager";

const CRD_DIR: &str = "crds";
const CONTROLLER_FILE: &str = "cert-manager.yaml";

/// Load the CRD and controller bundles found under `dir`
///
/// Either bundle may be absent; a missing directory yields no bundles.
pub fn load_bundles(dir: &Path) -> Result<Vec<ResourceDocument>> {
    let mut bundles = Vec::new();

    let crd_files = yaml_files(&dir.join(CRD_DIR))?;
    let has_crds = !crd_files.is_empty();
    if has_crds {
        let mut manifests = Vec::new();
        for file in &crd_files {
            manifests.extend(read_manifests(file)?);
        }
        log::info!(
            "Loaded {} CRD manifest(s) from {} file(s)",
            manifests.len(),
            crd_files.len()
        );
        bundles.push(ResourceDocument::crd_bundle(CRD_BUNDLE, manifests));
    }

    let controller = dir.join(CONTROLLER_FILE);
    if controller.is_file() {
        let manifests = read_manifests(&controller)?;
        log::info!("Loaded {} controller manifest(s)", manifests.len());
        let mut bundle = ResourceDocument::controller_bundle(CONTROLLER_BUNDLE, manifests);
        if has_crds {
            bundle = bundle.with_dependency(ResourceRef::to(ApiKind::CrdBundle, CRD_BUNDLE));
        }
        bundles.push(bundle);
    }

    Ok(bundles)
}

/// `*.yaml` and `*.yml` files directly in `dir`, sorted by name
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Could not list {}", dir.display()))?;
        let path = entry.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");
        if entry.file_type().is_file() && is_yaml {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Every object in a multi-document YAML file
pub fn read_manifests(path: &Path) -> Result<Vec<Value>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    parse_manifests(&content).with_context(|| format!("Invalid YAML in {}", path.display()))
}

/// Split a YAML stream into objects
///
/// Empty documents are dropped and `List` objects are flattened into their
/// items.
pub fn parse_manifests(content: &str) -> Result<Vec<Value>> {
    let mut manifests = Vec::new();
    for document in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(document)?;
        push_manifest(value, &mut manifests);
    }
    Ok(manifests)
}

fn push_manifest(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Null => {}
        Value::Object(ref object)
            if object
                .get("kind")
                .and_then(Value::as_str)
                .is_some_and(|k| k.ends_with("List")) =>
        {
            if let Some(Value::Array(items)) = object.get("items") {
                for item in items {
                    push_manifest(item.clone(), out);
                }
            }
        }
        other => out.push(other),
    }
}
