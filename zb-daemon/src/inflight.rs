// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Per-drv_hash coalescing table (§4.3): `inflight: drv_hash → BuildFuture`.
//!
//! Concurrent `realize` calls for the same derivation hash attach to the
//! same in-progress build instead of invoking the builder twice. Each
//! entry carries a ref count and a cancellation token; the last caller to
//! detach a not-yet-started build cancels it.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

/// The terminal outcome of a coalesced build.
#[derive(Clone)]
pub enum BuildOutcome {
    Success(BTreeMap<String, String>),
    Failed(String),
    Cancelled,
}

/// A single in-flight build, shared by every caller waiting on the same
/// `drv_hash`.
pub struct BuildFuture {
    pub build_uuid: String,
    ref_count: AtomicUsize,
    pub cancellation: CancellationToken,
    result_tx: watch::Sender<Option<BuildOutcome>>,
}

impl BuildFuture {
    /// Block until the build completes, or observe it already has.
    pub async fn outcome(&self) -> BuildOutcome {
        let mut rx = self.result_tx.subscribe();
        loop {
            if let Some(outcome) = rx.borrow().clone() {
                return outcome;
            }
            if rx.changed().await.is_err() {
                return BuildOutcome::Cancelled;
            }
        }
    }
}

#[derive(Default)]
pub struct InflightTable {
    entries: Mutex<HashMap<String, Arc<BuildFuture>>>,
}

/// Whether this caller created a fresh entry (and so owns invoking the
/// Builder) or attached to an existing one.
pub enum Attach {
    Created(Arc<BuildFuture>),
    Joined(Arc<BuildFuture>),
}

impl InflightTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire or create the inflight entry for `drv_hash` (§4.3 step 2a).
    pub async fn acquire(&self, drv_hash: &str, build_uuid: impl FnOnce() -> String) -> Attach {
        let mut entries = self.entries.lock().await;
        if let Some(existing) = entries.get(drv_hash) {
            existing.ref_count.fetch_add(1, Ordering::SeqCst);
            return Attach::Joined(existing.clone());
        }

        let (tx, _rx) = watch::channel(None);
        let future = Arc::new(BuildFuture {
            build_uuid: build_uuid(),
            ref_count: AtomicUsize::new(1),
            cancellation: CancellationToken::new(),
            result_tx: tx,
        });
        entries.insert(drv_hash.to_string(), future.clone());
        Attach::Created(future)
    }

    /// Publish the result and remove the entry (§4.3 step 2d).
    pub async fn complete(&self, drv_hash: &str, outcome: BuildOutcome) {
        let mut entries = self.entries.lock().await;
        if let Some(future) = entries.remove(drv_hash) {
            let _ = future.result_tx.send(Some(outcome));
        }
    }

    /// Decrement the ref count on the future owned by `drv_hash`. If it
    /// drops to zero and the build hasn't completed, cancel it (§4.3
    /// cancellation).
    pub async fn release(&self, drv_hash: &str) {
        let entries = self.entries.lock().await;
        if let Some(future) = entries.get(drv_hash) {
            if future.ref_count.fetch_sub(1, Ordering::SeqCst) == 1 {
                future.cancellation.cancel();
            }
        }
    }

    pub async fn get(&self, drv_hash: &str) -> Option<Arc<BuildFuture>> {
        self.entries.lock().await.get(drv_hash).cloned()
    }
}


impl std::fmt::Debug for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildOutcome::Success(outputs) => write!(f, "Success({outputs:?})"),
            BuildOutcome::Failed(msg) => write!(f, "Failed({msg})"),
            BuildOutcome::Cancelled => write!(f, "Cancelled"),
        }
    }
}
