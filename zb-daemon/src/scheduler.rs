// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Internal build scheduler for standalone daemon mode.
//!
//! Manages concurrent builds with a `max_jobs` semaphore and DAG-aware
//! dependency resolution. Builds are scheduled FIFO within each wave
//! of the topological sort.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, Semaphore};

use zb_store_core::store_path::StorePath;

/// Result of a scheduled build.
#[derive(Debug, Clone)]
pub enum ScheduledBuildResult {
    /// Build completed successfully.
    Success,
    /// Build failed.
    Failed(String),
    /// Build was not attempted because a dependency failed.
    DependencyFailed(StorePath),
}

/// A node in the build dependency graph.
#[derive(Debug, Clone)]
pub struct BuildNode {
    /// The derivation path to build.
    pub drv_path: StorePath,
    /// Paths this build depends on (must be built first).
    pub dependencies: BTreeSet<StorePath>,
}

/// Internal build scheduler.
///
/// Enforces `max_jobs` concurrent builds and resolves build order
/// based on the dependency DAG.
pub struct BuildScheduler {
    max_jobs: Arc<Semaphore>,
    max_jobs_count: usize,
}

impl BuildScheduler {
    /// Create a new scheduler with the given max concurrent jobs.
    pub fn new(max_jobs: usize) -> Self {
        Self {
            max_jobs: Arc::new(Semaphore::new(max_jobs)),
            max_jobs_count: max_jobs,
        }
    }

    /// Schedule and execute builds for a DAG of derivations.
    ///
    /// The `build_fn` closure is called for each derivation that needs building.
    /// Returns a map of drv_path → result for all nodes.
    pub async fn build_dag<F, Fut>(
        &self,
        nodes: Vec<BuildNode>,
        build_fn: F,
    ) -> BTreeMap<StorePath, ScheduledBuildResult>
    where
        F: Fn(StorePath) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), String>> + Send + 'static,
    {
        let results: Arc<Mutex<BTreeMap<StorePath, ScheduledBuildResult>>> =
            Arc::new(Mutex::new(BTreeMap::new()));

        // Build a dependency map for quick lookup
        let dep_map: HashMap<StorePath, BTreeSet<StorePath>> = nodes
            .iter()
            .map(|n| (n.drv_path.clone(), n.dependencies.clone()))
            .collect();
        let all_paths: BTreeSet<StorePath> = nodes.iter().map(|n| n.drv_path.clone()).collect();

        // Topological sort: process in waves
        let mut remaining: BTreeSet<StorePath> = all_paths.clone();
        let build_fn = Arc::new(build_fn);

        while !remaining.is_empty() {
            // Find all nodes whose dependencies are satisfied
            let ready: Vec<StorePath> = remaining
                .iter()
                .filter(|path| {
                    dep_map
                        .get(*path)
                        .map(|deps| {
                            deps.iter()
                                .all(|dep| !remaining.contains(dep) || !all_paths.contains(dep))
                        })
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            if ready.is_empty() && !remaining.is_empty() {
                // Cycle detected or unresolvable deps — fail remaining
                for path in &remaining {
                    results.lock().await.insert(
                        path.clone(),
                        ScheduledBuildResult::Failed("unresolvable dependency cycle".into()),
                    );
                }
                break;
            }

            // Check if any dependency has failed — propagate DependencyFailed
            let mut actually_ready = Vec::new();
            for path in &ready {
                let deps = dep_map.get(path).cloned().unwrap_or_default();
                let results_guard = results.lock().await;
                let failed_dep = deps.iter().find(|dep| {
                    matches!(
                        results_guard.get(*dep),
                        Some(ScheduledBuildResult::Failed(_))
                            | Some(ScheduledBuildResult::DependencyFailed(_))
                    )
                });

                if let Some(failed) = failed_dep {
                    drop(results_guard);
                    results.lock().await.insert(
                        path.clone(),
                        ScheduledBuildResult::DependencyFailed(failed.clone()),
                    );
                } else {
                    drop(results_guard);
                    actually_ready.push(path.clone());
                }
            }

            // Remove ready nodes from remaining
            for path in &ready {
                remaining.remove(path);
            }

            // Spawn builds for actually ready nodes, limited by semaphore
            let mut handles = Vec::new();
            for path in actually_ready {
                let semaphore = self.max_jobs.clone();
                let build_fn = build_fn.clone();
                let results = results.clone();
                let path_clone = path.clone();

                let handle = tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.unwrap();
                    let result = match build_fn(path_clone.clone()).await {
                        Ok(()) => ScheduledBuildResult::Success,
                        Err(msg) => ScheduledBuildResult::Failed(msg),
                    };
                    results.lock().await.insert(path_clone, result);
                });
                handles.push(handle);
            }

            // Wait for this wave to complete
            for handle in handles {
                let _ = handle.await;
            }
        }

        Arc::try_unwrap(results)
            .unwrap_or_else(|arc| {
                let guard = arc.blocking_lock();
                Mutex::new(guard.clone())
            })
            .into_inner()
    }

    /// Number of concurrent build slots.
    pub fn max_jobs(&self) -> usize {
        self.max_jobs_count
    }
}
