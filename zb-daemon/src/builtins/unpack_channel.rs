// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Builtin: unpack-channel — unpack a channel tarball into the output path.
//!
//! Matches Nix's `builtinUnpackChannel` behavior:
//! 1. Read the `src` tarball and `channelName` from the derivation env.
//! 2. Validate that `channelName` contains no path separators.
//! 3. Extract the tarball into `$out` using libarchive (via `compress-tools`),
//!    which auto-detects all compression formats that libarchive supports
//!    (gzip, bzip2, xz, zstd, lz4, lzma, etc.) — matching Nix's use of
//!    `archive_read_support_filter_all`.
//! 4. Verify exactly one top-level entry was extracted.
//! 5. Rename that entry to `$out/$channelName`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use zb_store_core::derivation::BasicDerivation;
use zb_store_core::derived_path::OutputName;
use zb_store_core::store_path::{StoreDir, StorePath};

use crate::build::BuildError;

pub async fn builtin_unpack_channel(
    _drv: &BasicDerivation,
    env: &BTreeMap<String, String>,
    output_paths: &[(OutputName, StorePath)],
    store_dir: &StoreDir,
) -> Result<(), BuildError> {
    let (_, out_path) = output_paths
        .first()
        .ok_or_else(|| BuildError::Other("unpack-channel: no output path".to_string()))?;
    let dest = store_dir.to_path().join(out_path.to_string());

    let src = env.get("src").ok_or_else(|| {
        BuildError::Other("builtin:unpack-channel requires 'src' env var".to_string())
    })?;

    let channel_name = env.get("channelName").ok_or_else(|| {
        BuildError::Other("builtin:unpack-channel requires 'channelName' env var".to_string())
    })?;

    // Validate channelName contains no path separators (matches Nix's check)
    if Path::new(channel_name)
        .file_name()
        .map(|f| f != channel_name.as_str())
        .unwrap_or(true)
    {
        return Err(BuildError::Other(format!(
            "channelName is not allowed to contain filesystem separators, got {channel_name}"
        )));
    }

    std::fs::create_dir_all(&dest).map_err(|e| {
        BuildError::Other(format!(
            "builtin:unpack-channel: failed to create output dir: {e}"
        ))
    })?;

    // Extract the tarball using libarchive (via compress-tools), which
    // auto-detects all supported compression formats — matching Nix's
    // archive_read_support_filter_all + archive_read_support_format_tar/zip.
    let source = std::fs::File::open(src).map_err(|e| {
        BuildError::Other(format!(
            "builtin:unpack-channel: failed to open '{src}': {e}"
        ))
    })?;
    compress_tools::uncompress_archive(source, &dest, compress_tools::Ownership::Ignore)
        .map_err(|e| BuildError::Other(format!("builtin:unpack-channel: extraction error: {e}")))?;

    // Nix expects exactly one top-level entry in the tarball, then renames
    // it to $out/$channelName.
    let mut entries: Vec<PathBuf> = std::fs::read_dir(&dest)
        .map_err(|e| BuildError::Other(format!("builtin:unpack-channel: read_dir error: {e}")))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();

    if entries.len() != 1 {
        return Err(BuildError::Other(format!(
            "channel tarball '{}' contains {} entries, expected exactly 1",
            src,
            entries.len()
        )));
    }

    let extracted = entries.remove(0);
    let target = dest.join(channel_name);
    std::fs::rename(&extracted, &target).map_err(|e| {
        BuildError::Other(format!(
            "builtin:unpack-channel: failed to rename {} to {}: {e}",
            extracted.display(),
            target.display()
        ))
    })?;

    Ok(())
}
