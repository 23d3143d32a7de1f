// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Read query operations for the store database.

use std::collections::BTreeSet;

use rusqlite::params;

use crate::connection::StoreDb;
use crate::error::Result;
use crate::types::{
    BuildLogChunk, BuildResultRow, BuildRow, ClosureEntry, RealizationRow, StoreObjectRow,
    unix_to_system_time,
};

impl StoreDb {
    /// Query a store object by full path. Returns `None` if absent (§4.1 `stat`).
    pub fn query_object(&self, path: &str) -> Result<Option<StoreObjectRow>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT o.id, p.path, o.nar_size, o.nar_hash, o.ca, d.path
            FROM objects o
            JOIN paths p ON p.id = o.id
            LEFT JOIN paths d ON d.id = o.deriver
            WHERE p.path = ?1
            "#,
        )?;

        let row = stmt.query_row(params![path], |row| {
            Ok(StoreObjectRow {
                id: row.get(0)?,
                path: row.get(1)?,
                nar_size: row.get::<_, i64>(2)? as u64,
                nar_hash: row.get(3)?,
                ca: row.get(4)?,
                deriver: row.get(5)?,
                references: BTreeSet::new(),
            })
        });

        match row {
            Ok(mut obj) => {
                obj.references = self.query_references_by_id(obj.id)?;
                Ok(Some(obj))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Look up a store path by its digest (the 32-character prefix).
    pub fn query_path_from_hash_part(
        &self,
        store_dir: &str,
        hash_part: &str,
    ) -> Result<Option<String>> {
        let prefix = format!("{store_dir}/{hash_part}");

        let mut stmt = self
            .conn
            .prepare_cached("SELECT path FROM paths WHERE path >= ?1 ORDER BY path LIMIT 1")?;

        let result: Option<String> = stmt.query_row(params![&prefix], |row| row.get(0)).ok();

        match result {
            Some(path) if path.starts_with(&prefix) => Ok(Some(path)),
            _ => Ok(None),
        }
    }

    /// Check whether a path has an object row (§4.1 invariant I3).
    pub fn is_valid_path(&self, path: &str) -> Result<bool> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT 1 FROM objects o JOIN paths p ON p.id = o.id WHERE p.path = ?1 LIMIT 1",
        )?;
        Ok(stmt.query_row(params![path], |_| Ok(())).is_ok())
    }

    /// Direct references of a path (§4.1 `references`).
    pub fn query_references(&self, path: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT p2.path
            FROM "references" r
            JOIN paths p1 ON p1.id = r.referrer
            JOIN paths p2 ON p2.id = r.reference
            WHERE p1.path = ?1
            "#,
        )?;

        let mut refs = BTreeSet::new();
        let mut rows = stmt.query(params![path])?;
        while let Some(row) = rows.next()? {
            refs.insert(row.get(0)?);
        }
        Ok(refs)
    }

    fn query_references_by_id(&self, id: i64) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT p.path
            FROM "references" r
            JOIN paths p ON p.id = r.reference
            WHERE r.referrer = ?1
            "#,
        )?;

        let mut refs = BTreeSet::new();
        let mut rows = stmt.query(params![id])?;
        while let Some(row) = rows.next()? {
            refs.insert(row.get(0)?);
        }
        Ok(refs)
    }

    /// Paths that reference a given path (reverse dependencies).
    pub fn query_referrers(&self, path: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT p1.path
            FROM "references" r
            JOIN paths p1 ON p1.id = r.referrer
            JOIN paths p2 ON p2.id = r.reference
            WHERE p2.path = ?1
            "#,
        )?;

        let mut refs = BTreeSet::new();
        let mut rows = stmt.query(params![path])?;
        while let Some(row) = rows.next()? {
            refs.insert(row.get(0)?);
        }
        Ok(refs)
    }

    /// All store paths in the database. Warning: can be slow on a large store.
    pub fn query_all_valid_paths(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT p.path FROM objects o JOIN paths p ON p.id = o.id")?;

        let mut paths = Vec::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            paths.push(row.get(0)?);
        }
        Ok(paths)
    }

    /// Count the number of store objects.
    pub fn count_valid_paths(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM objects", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Look up the id of a drv_hash row, if registered.
    pub fn query_drv_hash_id(&self, algorithm: &str, bits: &str) -> Result<Option<i64>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM drv_hashes WHERE algorithm = ?1 AND bits = ?2")?;
        Ok(stmt.query_row(params![algorithm, bits], |row| row.get(0)).ok())
    }

    /// Query the realization for (drv_hash, output_name), per §4.2 realization lookup.
    pub fn query_realization(
        &self,
        drv_hash_id: i64,
        output_name: &str,
    ) -> Result<Option<RealizationRow>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT r.drv_hash, r.output_name, p.path
            FROM realizations r
            JOIN paths p ON p.id = r.output_path
            WHERE r.drv_hash = ?1 AND r.output_name = ?2
            "#,
        )?;

        let result = stmt.query_row(params![drv_hash_id, output_name], |row| {
            Ok(RealizationRow {
                drv_hash_id: row.get(0)?,
                output_name: row.get(1)?,
                output_path: row.get(2)?,
            })
        });

        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Public keys that signed a given realization and verify format-wise (raw bytes
    /// returned; cryptographic verification happens in the realizer).
    pub fn query_realization_signatures(
        &self,
        drv_hash_id: i64,
        output_name: &str,
    ) -> Result<Vec<(Option<Vec<u8>>, Option<Vec<u8>>)>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT k.public_key, s.signature
            FROM signatures s
            LEFT JOIN signature_public_keys k ON k.id = s.public_key_id
            WHERE s.drv_hash = ?1 AND s.output_name = ?2
            "#,
        )?;

        let mut out = Vec::new();
        let mut rows = stmt.query(params![drv_hash_id, output_name])?;
        while let Some(row) = rows.next()? {
            out.push((row.get(0)?, row.get(1)?));
        }
        Ok(out)
    }

    /// The closure of `path`, computed by a recursive CTE (§4.1 `closure`, §6.4).
    ///
    /// When a realization context `(drv_hash_id, output_name)` is supplied, the walk
    /// prefers `reference_classes` edges rooted at that context and falls back to
    /// plain `references` for paths with no matching reference-class row.
    pub fn query_closure(
        &self,
        path: &str,
        realization_context: Option<(i64, &str)>,
    ) -> Result<Vec<ClosureEntry>> {
        let mut entries = Vec::new();
        let mut seen = BTreeSet::new();
        let mut frontier = vec![(path.to_string(), realization_context.map(|(id, name)| (id, name.to_string())))];

        while let Some((current_path, ctx)) = frontier.pop() {
            if !seen.insert(current_path.clone()) {
                continue;
            }

            let drv_hash = match &ctx {
                Some((id, _)) => self.query_drv_hash_tuple(*id)?,
                None => None,
            };
            entries.push(ClosureEntry {
                path: current_path.clone(),
                drv_hash: drv_hash.clone(),
                output_name: ctx.as_ref().map(|(_, name)| name.clone()),
            });

            let children = match &ctx {
                Some((drv_hash_id, output_name)) => {
                    let via_class =
                        self.query_reference_class_children(&current_path, *drv_hash_id, output_name)?;
                    if via_class.is_empty() {
                        self.query_references(&current_path)?
                            .into_iter()
                            .map(|p| (p, None))
                            .collect()
                    } else {
                        via_class
                    }
                }
                None => self
                    .query_references(&current_path)?
                    .into_iter()
                    .map(|p| (p, None))
                    .collect(),
            };

            for (child_path, child_ctx) in children {
                if !seen.contains(&child_path) {
                    frontier.push((child_path, child_ctx));
                }
            }
        }

        entries.sort();
        Ok(entries)
    }

    fn query_drv_hash_tuple(&self, drv_hash_id: i64) -> Result<Option<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT algorithm, bits FROM drv_hashes WHERE id = ?1")?;
        Ok(stmt
            .query_row(params![drv_hash_id], |row| Ok((row.get(0)?, row.get(1)?)))
            .ok())
    }

    fn query_reference_class_children(
        &self,
        referrer_path: &str,
        referrer_drv_hash_id: i64,
        referrer_output_name: &str,
    ) -> Result<Vec<(String, Option<(i64, String)>)>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT p2.path, rc.reference_drv_hash, rc.reference_output_name
            FROM reference_classes rc
            JOIN paths p1 ON p1.id = rc.referrer
            JOIN paths p2 ON p2.id = rc.reference
            WHERE p1.path = ?1 AND rc.referrer_drv_hash = ?2 AND rc.referrer_output_name = ?3
            "#,
        )?;

        let mut out = Vec::new();
        let mut rows = stmt.query(params![referrer_path, referrer_drv_hash_id, referrer_output_name])?;
        while let Some(row) = rows.next()? {
            let path: String = row.get(0)?;
            let drv_hash: Option<i64> = row.get(1)?;
            let output_name: Option<String> = row.get(2)?;
            let ctx = match (drv_hash, output_name) {
                (Some(h), Some(n)) => Some((h, n)),
                _ => None,
            };
            out.push((path, ctx));
        }
        Ok(out)
    }

    /// Look up a build by its UUID (`build.find`).
    pub fn query_build(&self, uuid: &str) -> Result<Option<BuildRow>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, uuid, started_at, ended_at, internal_error,
                   expand_builder, expand_args, expand_env
            FROM builds WHERE uuid = ?1
            "#,
        )?;

        let result = stmt.query_row(params![uuid], |row| {
            Ok(BuildRow {
                id: row.get(0)?,
                uuid: row.get(1)?,
                started_at: unix_to_system_time(row.get(2)?),
                ended_at: row.get::<_, Option<i64>>(3)?.map(unix_to_system_time),
                internal_error: row.get(4)?,
                expand_builder: row.get(5)?,
                expand_args: row.get(6)?,
                expand_env: row.get(7)?,
            })
        });

        match result {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Derived status of a build, computed per §6.4's rule.
    pub fn query_build_status(&self, build_id: i64) -> Result<String> {
        let (ended_at, internal_error): (Option<i64>, Option<String>) = self.conn.query_row(
            "SELECT ended_at, internal_error FROM builds WHERE id = ?1",
            params![build_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        if ended_at.is_none() {
            return Ok("active".to_string());
        }
        if internal_error.is_some() {
            return Ok("error".to_string());
        }

        let error_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM build_results WHERE build_id = ?1 AND status = 'error'",
            params![build_id],
            |row| row.get(0),
        )?;
        if error_count > 0 {
            return Ok("error".to_string());
        }

        let fail_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM build_results WHERE build_id = ?1 AND status = 'fail'",
            params![build_id],
            |row| row.get(0),
        )?;
        if fail_count > 0 {
            return Ok("fail".to_string());
        }

        Ok("success".to_string())
    }

    /// `build.find_result`: a build result row plus its registered outputs.
    pub fn query_build_result(
        &self,
        build_id: i64,
        drv_path: &str,
    ) -> Result<Option<BuildResultRow>> {
        let mut stmt = self.conn.prepare_cached(
            r#"
            SELECT id, build_id, drv_path, status, started_at,
                   builder_started_at, builder_ended_at, ended_at, drv_hash
            FROM build_results
            WHERE build_id = ?1 AND drv_path = ?2
            "#,
        )?;

        let result = stmt.query_row(params![build_id, drv_path], |row| {
            Ok(BuildResultRow {
                id: row.get(0)?,
                build_id: row.get(1)?,
                drv_path: row.get(2)?,
                status: row.get(3)?,
                started_at: unix_to_system_time(row.get(4)?),
                builder_started_at: row.get::<_, Option<i64>>(5)?.map(unix_to_system_time),
                builder_ended_at: row.get::<_, Option<i64>>(6)?.map(unix_to_system_time),
                ended_at: row.get::<_, Option<i64>>(7)?.map(unix_to_system_time),
                drv_hash_id: row.get(8)?,
                outputs: Vec::new(),
            })
        });

        match result {
            Ok(mut r) => {
                r.outputs = self.query_build_outputs(r.id)?;
                Ok(Some(r))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn query_build_outputs(&self, result_id: i64) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT output_name, output_path FROM build_outputs WHERE result_id = ?1")?;
        let mut out = Vec::new();
        let mut rows = stmt.query(params![result_id])?;
        while let Some(row) = rows.next()? {
            out.push((row.get(0)?, row.get(1)?));
        }
        Ok(out)
    }

    /// `build.log`: bytes in `[start, end)` of a result's concatenated log (§8 property 7).
    pub fn query_build_log_range(
        &self,
        result_id: i64,
        start: u64,
        end: Option<u64>,
    ) -> Result<Vec<u8>> {
        let chunks = self.query_build_log_chunks(result_id)?;
        let mut full = Vec::new();
        for chunk in chunks {
            full.extend_from_slice(&chunk.data);
        }
        let end = end.unwrap_or(full.len() as u64).min(full.len() as u64);
        let start = start.min(end);
        Ok(full[start as usize..end as usize].to_vec())
    }

    fn query_build_log_chunks(&self, result_id: i64) -> Result<Vec<BuildLogChunk>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT seq, received_at, data FROM build_logs WHERE result_id = ?1 ORDER BY seq",
        )?;
        let mut out = Vec::new();
        let mut rows = stmt.query(params![result_id])?;
        while let Some(row) = rows.next()? {
            out.push(BuildLogChunk {
                seq: row.get(0)?,
                received_at: unix_to_system_time(row.get(1)?),
                data: row.get(2)?,
            });
        }
        Ok(out)
    }
}
