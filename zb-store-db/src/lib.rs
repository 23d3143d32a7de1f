// SPDX-FileCopyrightText: 2025 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! SQLite database interface for Nix store metadata.
//!
//! This crate provides read and write access to the Nix store's SQLite database,
//! enabling queries for store path metadata, references, and derivation outputs.
//!
//! **Architecture**: this is the store index layer: `paths`/`objects`/`references`
//! for the store object model, `drv_hashes`/`realizations`/`reference_classes`/
//! `signature_*` for the derivation realizer, and `builds`/`build_results`/
//! `build_outputs`/`build_logs` for the scheduler's bookkeeping.
//!
//! # Key Features
//!
//! - Full schema support for the store object layer and derivation realizer
//! - Read-only system database access
//! - In-memory database for testing
//! - Write operations for the backend's single writer connection
//!
//! # Example
//!
//! ```ignore
//! use zb_store_db::{StoreDb, OpenMode};
//!
//! // Open system database (read-only)
//! let db = StoreDb::open_system()?;
//!
//! // Query an object
//! if let Some(obj) = db.query_object("/opt/zb/store/...")? {
//!     println!("NAR size: {}", obj.nar_size);
//! }
//! ```

mod connection;
mod error;
mod query;
mod schema;
mod types;
mod write;

pub use connection::{OpenMode, StoreDb};
pub use error::{Error, Result};
pub use schema::SCHEMA_VERSION;
pub use types::*;
pub use write::*;
