// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Builtin: fetchurl — download a URL to the output path.
//!
//! Reads `url` from the derivation env and downloads it to `$out`.
//! For `unpack = 1`, the downloaded file is extracted as a NAR.

use std::collections::BTreeMap;

use zb_store_core::derivation::BasicDerivation;
use zb_store_core::derived_path::OutputName;
use zb_store_core::store_path::{StoreDir, StorePath};

use crate::build::BuildError;

pub(crate) async fn builtin_fetchurl(
    _drv: &BasicDerivation,
    env: &BTreeMap<String, String>,
    output_paths: &[(OutputName, StorePath)],
    store_dir: &StoreDir,
) -> Result<(), BuildError> {
    let url = env
        .get("url")
        .ok_or_else(|| BuildError::Other("builtin:fetchurl requires 'url' env var".to_string()))?;

    let (_, out_path) = output_paths
        .first()
        .ok_or_else(|| BuildError::Other("fetchurl: no output path".to_string()))?;
    let dest = store_dir.to_path().join(out_path.to_string());

    // Support file:// URLs by reading directly from disk
    if let Some(file_path) = url.strip_prefix("file://") {
        let content = tokio::fs::read(file_path).await.map_err(|e| {
            BuildError::Other(format!(
                "builtin:fetchurl failed to read '{file_path}': {e}"
            ))
        })?;

        let unpack = env.get("unpack").is_some_and(|v| v == "1");
        if unpack {
            // Treat the file as a NAR and restore it
            let cursor = std::io::Cursor::new(content);
            let events = zb_nar::parse_nar(cursor);
            use futures::StreamExt as _;
            let mapped = events.map(|item| match item {
                Ok(event) => Ok(event),
                Err(e) => Err(zb_nar::NarWriteError::create_file_error(
                    dest.clone(),
                    e,
                )),
            });
            zb_nar::restore(mapped, &dest)
                .await
                .map_err(|e| BuildError::Other(format!("builtin:fetchurl unpack error: {e}")))?;
        } else {
            tokio::fs::write(&dest, &content).await.map_err(|e| {
                BuildError::Other(format!(
                    "builtin:fetchurl failed to write '{}': {e}",
                    dest.display()
                ))
            })?;
        }
        Ok(())
    } else {
        Err(BuildError::Other(format!(
            "builtin:fetchurl: only file:// URLs are supported (got '{url}')"
        )))
    }
}
