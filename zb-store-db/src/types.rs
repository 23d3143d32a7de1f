// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Database row types for the store index.

use std::collections::BTreeSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A row from `objects`, joined with its path and references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreObjectRow {
    /// Database row ID (shared with `paths`).
    pub id: i64,
    /// Full store path (e.g. `/opt/zb/store/xxx-name`).
    pub path: String,
    /// Size of the canonical NAR serialization.
    pub nar_size: u64,
    /// `sha256:<hex>` hash of the canonical NAR.
    pub nar_hash: String,
    /// Content address string, if this object is content-addressed.
    pub ca: Option<String>,
    /// Store path of the derivation that produced this object, if any.
    pub deriver: Option<String>,
    /// Store paths this object references.
    pub references: BTreeSet<String>,
}

/// A derivation hash class (§4.2 fingerprinting).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrvHashRow {
    pub id: i64,
    pub algorithm: String,
    pub bits: String,
}

/// A `realizations` row: drv_hash/output_name → output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizationRow {
    pub drv_hash_id: i64,
    pub output_name: String,
    pub output_path: String,
}

/// A `reference_classes` row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceClassRow {
    pub id: i64,
    pub referrer: String,
    pub referrer_drv_hash_id: i64,
    pub referrer_output_name: String,
    pub reference: String,
    pub reference_drv_hash_id: Option<i64>,
    pub reference_output_name: Option<String>,
}

/// A registered signature verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePublicKeyRow {
    pub id: i64,
    pub format: String,
    pub public_key: Vec<u8>,
}

/// A signature over a realization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureRow {
    pub id: i64,
    pub drv_hash_id: i64,
    pub output_name: String,
    pub output_path: String,
    pub public_key_id: Option<i64>,
    pub signature: Option<Vec<u8>>,
}

/// One entry in a closure query's result (§4.1 `closure`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClosureEntry {
    pub path: String,
    pub drv_hash: Option<(String, String)>,
    pub output_name: Option<String>,
}

/// Derived status of a build, computed from `builds`/`build_results` (§6.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Active,
    Success,
    Fail,
    Error,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::Active => "active",
            BuildStatus::Success => "success",
            BuildStatus::Fail => "fail",
            BuildStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "active" => BuildStatus::Active,
            "success" => BuildStatus::Success,
            "fail" => BuildStatus::Fail,
            "error" => BuildStatus::Error,
            _ => return None,
        })
    }
}

/// A row from `builds`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRow {
    pub id: i64,
    pub uuid: String,
    pub started_at: SystemTime,
    pub ended_at: Option<SystemTime>,
    pub internal_error: Option<String>,
    pub expand_builder: Option<String>,
    pub expand_args: Option<String>,
    pub expand_env: Option<String>,
}

/// A row from `build_results`, with the status derived per §6.4.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResultRow {
    pub id: i64,
    pub build_id: i64,
    pub drv_path: String,
    pub status: String,
    pub started_at: SystemTime,
    pub builder_started_at: Option<SystemTime>,
    pub builder_ended_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub drv_hash_id: Option<i64>,
    pub outputs: Vec<(String, String)>,
}

/// A chunk of build log output from `build_logs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLogChunk {
    pub seq: i64,
    pub received_at: SystemTime,
    pub data: Vec<u8>,
}

/// Convert Unix timestamp to SystemTime.
pub(crate) fn unix_to_system_time(timestamp: i64) -> SystemTime {
    if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs((-timestamp) as u64)
    }
}

/// Convert SystemTime to Unix timestamp.
pub(crate) fn system_time_to_unix(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(duration) => duration.as_secs() as i64,
        Err(e) => -(e.duration().as_secs() as i64),
    }
}
