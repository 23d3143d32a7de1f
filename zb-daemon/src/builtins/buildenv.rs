// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Builtin: buildenv — create a symlink tree (user environment) from packages.
//!
//! Reads the package paths from the derivation env and creates a directory
//! at `$out` with symlinks into each package.

use std::collections::BTreeMap;
use std::path::PathBuf;

use zb_store_core::derivation::BasicDerivation;
use zb_store_core::derived_path::OutputName;
use zb_store_core::store_path::{StoreDir, StorePath};

use crate::build::BuildError;

pub(crate) async fn builtin_buildenv(
    _drv: &BasicDerivation,
    env: &BTreeMap<String, String>,
    output_paths: &[(OutputName, StorePath)],
    store_dir: &StoreDir,
) -> Result<(), BuildError> {
    let (_, out_path) = output_paths
        .first()
        .ok_or_else(|| BuildError::Other("buildenv: no output path".to_string()))?;
    let dest = store_dir.to_path().join(out_path.to_string());

    // Read the manifest (JSON array of package paths)
    let manifest = env.get("manifest").ok_or_else(|| {
        BuildError::Other("builtin:buildenv requires 'manifest' env var".to_string())
    })?;

    // Parse the manifest as a JSON array of objects with `paths` fields
    let manifest_json: serde_json::Value = serde_json::from_str(manifest)
        .map_err(|e| BuildError::Other(format!("builtin:buildenv: invalid manifest JSON: {e}")))?;

    std::fs::create_dir_all(&dest).map_err(|e| {
        BuildError::Other(format!(
            "builtin:buildenv: failed to create output dir: {e}"
        ))
    })?;

    // Simple implementation: create symlinks for each package's top-level entries
    if let Some(pkgs) = manifest_json.as_array() {
        for pkg in pkgs {
            if let Some(paths) = pkg.get("paths").and_then(|p| p.as_array()) {
                for path_val in paths {
                    if let Some(pkg_path) = path_val.as_str() {
                        let pkg_dir = PathBuf::from(pkg_path);
                        if pkg_dir.is_dir() {
                            // Symlink each entry in the package dir into the output
                            if let Ok(entries) = std::fs::read_dir(&pkg_dir) {
                                for entry in entries.flatten() {
                                    let name = entry.file_name();
                                    let link = dest.join(&name);
                                    if !link.exists() {
                                        let _ = std::os::unix::fs::symlink(entry.path(), &link);
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
