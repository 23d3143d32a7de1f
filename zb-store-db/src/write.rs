// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Write operations for the store database.

use std::collections::BTreeSet;
use std::time::SystemTime;

use rusqlite::{OptionalExtension, params};

use crate::connection::StoreDb;
use crate::error::Result;
use crate::types::system_time_to_unix;

/// Parameters for registering a new store object (§4.1 `put`).
#[derive(Debug, Clone)]
pub struct RegisterObjectParams {
    pub path: String,
    pub nar_size: u64,
    pub nar_hash: String,
    pub ca: Option<String>,
    pub deriver: Option<String>,
    pub references: BTreeSet<String>,
}

impl Default for RegisterObjectParams {
    fn default() -> Self {
        Self {
            path: String::new(),
            nar_size: 0,
            nar_hash: String::new(),
            ca: None,
            deriver: None,
            references: BTreeSet::new(),
        }
    }
}

impl StoreDb {
    /// Register a store object and its references in one transaction.
    ///
    /// Idempotent: if `path` is already registered with the same `nar_hash`, the
    /// existing row id is returned without modification (§4.1 `put` idempotence).
    pub fn register_object(&mut self, params: &RegisterObjectParams) -> Result<i64> {
        let tx = self.conn.transaction()?;

        if let Some(existing) = tx
            .query_row(
                "SELECT o.id, o.nar_hash FROM objects o JOIN paths p ON p.id = o.id WHERE p.path = ?1",
                params![params.path],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?
        {
            let (id, nar_hash) = existing;
            tx.commit()?;
            if nar_hash == params.nar_hash {
                return Ok(id);
            }
            return Err(crate::error::Error::InvalidStorePath(format!(
                "path {} already registered with a different nar_hash",
                params.path
            )));
        }

        tx.execute(
            "INSERT INTO paths (path) VALUES (?1)",
            params![params.path],
        )?;
        let id = tx.last_insert_rowid();

        let deriver_id: Option<i64> = match &params.deriver {
            Some(d) => tx
                .query_row("SELECT id FROM paths WHERE path = ?1", params![d], |row| {
                    row.get(0)
                })
                .optional()?,
            None => None,
        };

        tx.execute(
            "INSERT INTO objects (id, nar_size, nar_hash, ca, deriver) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id,
                params.nar_size as i64,
                params.nar_hash,
                params.ca,
                deriver_id,
            ],
        )?;

        for reference in &params.references {
            let ref_id: Option<i64> = tx
                .query_row(
                    "SELECT id FROM paths WHERE path = ?1",
                    params![reference],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(ref_id) = ref_id {
                tx.execute(
                    r#"INSERT OR REPLACE INTO "references" (referrer, reference) VALUES (?1, ?2)"#,
                    params![id, ref_id],
                )?;
            }
        }

        tx.commit()?;
        Ok(id)
    }

    /// Delete store objects (§4.1 `delete`). Fails if any remaining object still
    /// references one of `paths` (§8 GC safety).
    pub fn delete_objects(&mut self, paths: &[String]) -> Result<()> {
        let tx = self.conn.transaction()?;

        let placeholders: Vec<String> = paths.iter().map(|_| "?".to_string()).collect();
        let in_clause = placeholders.join(",");

        let referrer_count: i64 = {
            let sql = format!(
                r#"
                SELECT COUNT(*)
                FROM "references" r
                JOIN paths p1 ON p1.id = r.referrer
                JOIN paths p2 ON p2.id = r.reference
                WHERE p2.path IN ({in_clause}) AND p1.path NOT IN ({in_clause})
                "#
            );
            let mut stmt = tx.prepare(&sql)?;
            let bound: Vec<&str> = paths.iter().chain(paths.iter()).map(String::as_str).collect();
            stmt.query_row(rusqlite::params_from_iter(bound), |row| row.get(0))?
        };

        if referrer_count > 0 {
            return Err(crate::error::Error::InvalidStorePath(
                "refusing to delete: referenced by a path outside the deletion set".to_string(),
            ));
        }

        for path in paths {
            tx.execute("DELETE FROM paths WHERE path = ?1", params![path])?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Add a reference from one object to another (both must already exist).
    pub fn add_reference(&self, referrer_path: &str, reference_path: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO "references" (referrer, reference)
            SELECT r.id, f.id FROM paths r, paths f WHERE r.path = ?1 AND f.path = ?2
            "#,
            params![referrer_path, reference_path],
        )?;
        Ok(())
    }

    /// Get or create a `drv_hashes` row, returning its id.
    pub fn get_or_create_drv_hash(&self, algorithm: &str, bits: &str) -> Result<i64> {
        if let Some(id) = self.query_drv_hash_id(algorithm, bits)? {
            return Ok(id);
        }
        self.conn.execute(
            "INSERT INTO drv_hashes (algorithm, bits) VALUES (?1, ?2)",
            params![algorithm, bits],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record a realization after a successful build (§4.2).
    pub fn register_realization(
        &self,
        drv_hash_id: i64,
        output_name: &str,
        output_path: &str,
    ) -> Result<()> {
        let output_path_id: i64 = self.conn.query_row(
            "SELECT id FROM paths WHERE path = ?1",
            params![output_path],
            |row| row.get(0),
        )?;

        self.conn.execute(
            "INSERT OR REPLACE INTO realizations (drv_hash, output_name, output_path) VALUES (?1, ?2, ?3)",
            params![drv_hash_id, output_name, output_path_id],
        )?;
        Ok(())
    }

    /// Record a reference-class edge (§4.2 reference-class tracking).
    #[allow(clippy::too_many_arguments)]
    pub fn register_reference_class(
        &self,
        referrer: &str,
        referrer_drv_hash_id: i64,
        referrer_output_name: &str,
        reference: &str,
        reference_drv_hash_id: Option<i64>,
        reference_output_name: Option<&str>,
    ) -> Result<()> {
        let referrer_id: i64 = self.conn.query_row(
            "SELECT id FROM paths WHERE path = ?1",
            params![referrer],
            |row| row.get(0),
        )?;
        let reference_id: i64 = self.conn.query_row(
            "SELECT id FROM paths WHERE path = ?1",
            params![reference],
            |row| row.get(0),
        )?;

        self.conn.execute(
            r#"
            INSERT INTO reference_classes
                (referrer, referrer_drv_hash, referrer_output_name,
                 reference, reference_drv_hash, reference_output_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                referrer_id,
                referrer_drv_hash_id,
                referrer_output_name,
                reference_id,
                reference_drv_hash_id,
                reference_output_name,
            ],
        )?;
        Ok(())
    }

    /// Register (or look up) a signature public key, returning its id.
    pub fn register_signature_public_key(&self, format: &str, public_key: &[u8]) -> Result<i64> {
        if let Some(id) = self
            .conn
            .query_row(
                "SELECT id FROM signature_public_keys WHERE format = ?1 AND public_key = ?2",
                params![format, public_key],
                |row| row.get(0),
            )
            .optional()?
        {
            return Ok(id);
        }

        self.conn.execute(
            "INSERT INTO signature_public_keys (format, public_key) VALUES (?1, ?2)",
            params![format, public_key],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Attach a signature to a realization.
    pub fn register_signature(
        &self,
        drv_hash_id: i64,
        output_name: &str,
        output_path: &str,
        public_key_id: Option<i64>,
        signature: Option<&[u8]>,
    ) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO signatures (drv_hash, output_name, output_path, public_key_id, signature)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![drv_hash_id, output_name, output_path, public_key_id, signature],
        )?;
        Ok(())
    }

    /// Create a `builds` row when a client calls `realize`/`build`.
    pub fn create_build(
        &self,
        uuid: &str,
        started_at: SystemTime,
        expand_builder: Option<&str>,
        expand_args: Option<&str>,
        expand_env: Option<&str>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO builds (uuid, started_at, expand_builder, expand_args, expand_env)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                uuid,
                system_time_to_unix(started_at),
                expand_builder,
                expand_args,
                expand_env,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Mark a build's terminal state (set exactly once, per the build lifecycle).
    pub fn finish_build(
        &self,
        build_id: i64,
        ended_at: SystemTime,
        internal_error: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE builds SET ended_at = ?2, internal_error = ?3 WHERE id = ?1",
            params![build_id, system_time_to_unix(ended_at), internal_error],
        )?;
        Ok(())
    }

    /// Mark any build with `ended_at IS NULL` as orphaned (§4.3 crash recovery).
    pub fn mark_orphaned_builds(&self, now: SystemTime) -> Result<u64> {
        let rows = self.conn.execute(
            "UPDATE builds SET ended_at = ?1, internal_error = 'orphaned' WHERE ended_at IS NULL",
            params![system_time_to_unix(now)],
        )?;
        self.conn.execute(
            "UPDATE build_results SET status = 'error', ended_at = ?1 WHERE status = 'active'",
            params![system_time_to_unix(now)],
        )?;
        Ok(rows as u64)
    }

    /// Create a `build_results` row for one derivation within a build.
    pub fn create_build_result(
        &self,
        build_id: i64,
        drv_path: &str,
        started_at: SystemTime,
        drv_hash_id: Option<i64>,
    ) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO build_results (build_id, drv_path, status, started_at, drv_hash)
            VALUES (?1, ?2, 'active', ?3, ?4)
            "#,
            params![build_id, drv_path, system_time_to_unix(started_at), drv_hash_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Record that the builder process started/ended.
    pub fn update_build_result_builder_times(
        &self,
        result_id: i64,
        builder_started_at: Option<SystemTime>,
        builder_ended_at: Option<SystemTime>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE build_results SET builder_started_at = ?2, builder_ended_at = ?3 WHERE id = ?1",
            params![
                result_id,
                builder_started_at.map(system_time_to_unix),
                builder_ended_at.map(system_time_to_unix),
            ],
        )?;
        Ok(())
    }

    /// Set the terminal status of one build result.
    pub fn finish_build_result(
        &self,
        result_id: i64,
        status: crate::types::BuildStatus,
        ended_at: SystemTime,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE build_results SET status = ?2, ended_at = ?3 WHERE id = ?1",
            params![result_id, status.as_str(), system_time_to_unix(ended_at)],
        )?;
        Ok(())
    }

    /// Register one output of a finished build result.
    pub fn add_build_output(&self, result_id: i64, output_name: &str, output_path: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO build_outputs (result_id, output_name, output_path) VALUES (?1, ?2, ?3)",
            params![result_id, output_name, output_path],
        )?;
        Ok(())
    }

    /// Append a chunk of build log (§4.3 backpressure / §8 log resume).
    pub fn append_build_log(
        &self,
        result_id: i64,
        seq: i64,
        received_at: SystemTime,
        data: &[u8],
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO build_logs (result_id, seq, received_at, data) VALUES (?1, ?2, ?3, ?4)",
            params![result_id, seq, system_time_to_unix(received_at), data],
        )?;
        Ok(())
    }
}
