// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! JSON-RPC 2.0 envelope and method payloads for the store backend's
//! client-facing surface (`store.*`, `realize`, `build.*`).
//!
//! Framing and the out-of-band NAR channel live in `zb-daemon`; this module
//! only defines the JSON shapes that travel over channel `0x01`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: Value, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response envelope; exactly one of `result`/`error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC error object, tagged with the backend's error taxonomy (§7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The backend's error taxonomy, surfaced on the wire as `{code, message, data?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    BadContentAddress,
    RefsMismatch,
    DerivationMalformed,
    BuildFailed,
    OutputHashMismatch,
    Cancelled,
    Timeout,
    PermissionDenied,
    Internal,
}

impl ErrorKind {
    /// JSON-RPC error codes in the implementation-defined server-error range
    /// (-32000..-32099), one per taxonomy member (§7).
    pub fn code(self) -> i64 {
        match self {
            ErrorKind::NotFound => -32000,
            ErrorKind::BadContentAddress => -32001,
            ErrorKind::RefsMismatch => -32002,
            ErrorKind::DerivationMalformed => -32003,
            ErrorKind::BuildFailed => -32004,
            ErrorKind::OutputHashMismatch => -32005,
            ErrorKind::Cancelled => -32006,
            ErrorKind::Timeout => -32007,
            ErrorKind::PermissionDenied => -32008,
            ErrorKind::Internal => -32099,
        }
    }

    pub fn rpc_error(self, message: impl Into<String>, data: Option<Value>) -> RpcError {
        RpcError {
            code: self.code(),
            message: message.into(),
            data,
        }
    }
}

// -- store.info --------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfoParams {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreInfoResult {
    pub nar_size: u64,
    pub nar_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<String>,
    pub references: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deriver: Option<String>,
}

// -- store.export / store.import ---------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreExportParams {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreImportResult {
    pub path: String,
}

// -- store.closure -------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreClosureParams {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drv_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosureEntryWire {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drv_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_name: Option<String>,
}

// -- store.references ----------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreReferencesParams {
    pub path: String,
}

// -- realize ---------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReusePolicy {
    /// Reuse any existing, index-recorded realization.
    ReuseExisting,
    /// Always schedule a fresh build, ignoring the realization cache.
    Rebuild,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustPolicy {
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub trusted_keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizeParams {
    pub drv_path: String,
    pub outputs: Vec<String>,
    #[serde(default = "default_reuse_policy")]
    pub reuse_policy: ReusePolicy,
    #[serde(default)]
    pub trusted_keys: Vec<String>,
}

fn default_reuse_policy() -> ReusePolicy {
    ReusePolicy::ReuseExisting
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizeOutput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizeDrvResult {
    pub drv_path: String,
    pub status: String,
    pub outputs: Vec<RealizeOutput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealizeResult {
    pub build_id: String,
    pub results: Vec<RealizeDrvResult>,
}

// -- build.find / build.find_result / build.log / build.cancel -----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFindParams {
    pub build_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRowWire {
    pub build_id: String,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildFindResultParams {
    pub build_id: String,
    pub drv_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResultWire {
    pub drv_path: String,
    pub status: String,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<u64>,
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogParams {
    pub build_id: String,
    pub drv_path: String,
    pub start: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildLogChunkWire {
    pub start: u64,
    #[serde(with = "crate::rpc::base64_bytes")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildCancelParams {
    pub build_id: String,
}

/// `build.log` bytes travel JSON-encoded as base64, since JSON has no byte string.
pub mod base64_bytes {
    use data_encoding::BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&BASE64.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        BASE64.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
