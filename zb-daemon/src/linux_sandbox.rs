// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Linux sandbox for build isolation via user namespaces.
//!
//! Uses `CLONE_NEWUSER` + `CLONE_NEWNS` to isolate the builder process.
//! A build user UID is allocated via file locks in the userpool directory
//! (matching Nix's `AutoUserLock`) and mapped into the user namespace so
//! the builder runs as an unprivileged user with a unique UID per
//! concurrent build.
//!
//! The sandbox creates:
//! - A user namespace mapping the allocated UID to root inside
//! - A mount namespace with bind mounts for /nix/store, build dir, /proc, /dev
//!
//! Unprivileged user namespaces must be enabled on the host
//! (`kernel.unprivileged_userns_clone = 1`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::build_users::{self, UserLock};
use crate::sandbox::{Sandbox, SandboxChild, SandboxError, SandboxMount};

/// Configuration for a sandboxed Linux build.
pub struct LinuxSandboxConfig {
    /// Store directory (usually `/nix/store`).
    pub store_dir: PathBuf,
    /// Temporary build directory.
    pub build_dir: PathBuf,
    /// System features required by the derivation (e.g., "kvm").
    pub required_system_features: BTreeSet<String>,
    /// Extra sandbox paths from daemon config.
    pub extra_sandbox_paths: Vec<PathBuf>,
    /// Whether `__noChroot` is set in the derivation (allows network).
    pub no_chroot: bool,
}

impl LinuxSandboxConfig {
    /// Compute the list of bind mounts for the sandbox.
    pub fn bind_mounts(&self) -> Vec<SandboxMount> {
        let mut mounts = Vec::new();

        // /nix/store — read-only
        mounts.push(SandboxMount {
            source: self.store_dir.clone(),
            target: self.store_dir.clone(),
            read_only: true,
            optional: false,
        });

        // Build directory — read-write
        mounts.push(SandboxMount {
            source: self.build_dir.clone(),
            target: self.build_dir.clone(),
            read_only: false,
            optional: false,
        });

        // /proc
        mounts.push(SandboxMount {
            source: PathBuf::from("/proc"),
            target: PathBuf::from("/proc"),
            read_only: false,
            optional: false,
        });

        // /dev devices
        for dev in &["null", "zero", "urandom", "ptmx", "pts"] {
            let path = PathBuf::from(format!("/dev/{dev}"));
            mounts.push(SandboxMount {
                source: path.clone(),
                target: path,
                read_only: false,
                optional: false,
            });
        }

        // /dev/kvm if "kvm" system feature is required
        if self.required_system_features.contains("kvm") {
            mounts.push(SandboxMount {
                source: PathBuf::from("/dev/kvm"),
                target: PathBuf::from("/dev/kvm"),
                read_only: false,
                optional: false,
            });
        }

        // Extra sandbox paths from config
        for path in &self.extra_sandbox_paths {
            mounts.push(SandboxMount {
                source: path.clone(),
                target: path.clone(),
                read_only: true,
                optional: false,
            });
        }

        mounts
    }
}

/// Linux sandbox using user namespaces and bind mounts.
///
/// Each sandbox instance acquires a file-locked UID slot from the
/// userpool directory during `prepare()` and releases it during
/// `teardown()` (or on drop). The child process calls
/// `unshare(CLONE_NEWUSER | CLONE_NEWNS)` before exec, mapping the
/// allocated UID to root inside the namespace.
pub struct LinuxSandbox {
    config: LinuxSandboxConfig,
    /// Pool directory for file-lock based UID allocation.
    pool_dir: PathBuf,
    /// Auto-allocate start UID.
    start_id: u32,
    /// Total UIDs in the pool.
    id_count: u32,
    /// Allocated build user — held for the lifetime of the build.
    /// The file lock is released on drop.
    user_lock: Option<UserLock>,
}

impl LinuxSandbox {
    /// Create a new Linux sandbox with the given config.
    ///
    /// `pool_dir` is the directory for lock files (e.g. `<stateDir>/userpool2`).
    /// `start_id` and `id_count` define the UID range for auto-allocation.
    pub fn new(
        config: LinuxSandboxConfig,
        pool_dir: PathBuf,
        start_id: u32,
        id_count: u32,
    ) -> Self {
        Self {
            config,
            pool_dir,
            start_id,
            id_count,
            user_lock: None,
        }
    }

    /// The UID allocated for this build, if `prepare()` has been called.
    pub fn build_uid(&self) -> Option<u32> {
        self.user_lock.as_ref().map(|l| l.uid())
    }
}

impl Sandbox for LinuxSandbox {
    async fn prepare(&mut self) -> Result<(), SandboxError> {
        let pool_dir = self.pool_dir.clone();
        let start_id = self.start_id;
        let id_count = self.id_count;
        let lock = tokio::task::spawn_blocking(move || {
            build_users::acquire_auto_user_lock(&pool_dir, start_id, id_count, 1)
        })
        .await
        .map_err(|e| SandboxError::Setup(format!("spawn_blocking join: {e}")))?
        .map_err(|e| SandboxError::Setup(format!("acquire user lock: {e}")))?
        .ok_or_else(|| SandboxError::Setup("no build user slots available".into()))?;
        self.user_lock = Some(lock);
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[allow(unsafe_code)]
    async fn spawn(
        &self,
        builder: &str,
        args: &[&str],
        env: &BTreeMap<String, String>,
        work_dir: &Path,
    ) -> Result<SandboxChild, SandboxError> {
        let _build_uid = self
            .user_lock
            .as_ref()
            .ok_or_else(|| SandboxError::Spawn("prepare() not called".into()))?
            .uid();

        use std::os::unix::process::CommandExt;
        use std::process::Stdio;

        let no_chroot = self.config.no_chroot;

        // Capture real UID/GID before fork+unshare. After
        // unshare(CLONE_NEWUSER) the process is in a new user namespace
        // where its UID/GID appear as unmapped (65534). The uid_map and
        // gid_map must reference the *original* IDs from the parent
        // namespace.
        let real_uid = nix::unistd::getuid();
        let real_gid = nix::unistd::getgid();

        // Build with std::process::Command, then convert to tokio::process::Command.
        // This lets us use pre_exec (which requires std CommandExt) while still
        // getting tokio's async Child for wait/IO.
        let mut cmd = std::process::Command::new(builder);
        cmd.args(args)
            .current_dir(work_dir)
            .env_clear()
            .envs(env.iter())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // pre_exec runs in the child after fork, before exec.
        // We call unshare(2) here to create new namespaces.
        // SAFETY: unshare is async-signal-safe on Linux. We only call
        // unshare and write to /proc/self files, which are safe in the
        // post-fork child.
        unsafe {
            cmd.pre_exec(move || {
                use nix::sched::{CloneFlags, unshare};

                let mut flags = CloneFlags::CLONE_NEWUSER | CloneFlags::CLONE_NEWNS;
                if !no_chroot {
                    flags |= CloneFlags::CLONE_NEWNET;
                }

                unshare(flags).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("unshare({flags:?}): {e}"),
                    )
                })?;

                // Map the parent namespace UID/GID to root inside.
                std::fs::write("/proc/self/uid_map", format!("0 {real_uid} 1\n")).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("write uid_map: {e}"),
                    )
                })?;
                // Must write "deny" to setgroups before writing gid_map
                // (kernel requirement for unprivileged user namespaces)
                std::fs::write("/proc/self/setgroups", "deny\n").map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("write setgroups: {e}"),
                    )
                })?;
                std::fs::write("/proc/self/gid_map", format!("0 {real_gid} 1\n")).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::PermissionDenied,
                        format!("write gid_map: {e}"),
                    )
                })?;

                Ok(())
            });
        }

        // Convert to tokio Command (carries over pre_exec) and spawn.
        // After fork(), the child is single-threaded regardless of the
        // parent, so unshare(CLONE_NEWUSER) should succeed in pre_exec.
        let mut tokio_cmd = tokio::process::Command::from(cmd);
        let child = tokio_cmd.spawn().map_err(|e| {
            SandboxError::Spawn(format!("Failed to spawn '{builder}' in sandbox: {e}"))
        })?;

        Ok(SandboxChild::from_child(child))
    }

    #[cfg(not(target_os = "linux"))]
    async fn spawn(
        &self,
        _builder: &str,
        _args: &[&str],
        _env: &BTreeMap<String, String>,
        _work_dir: &Path,
    ) -> Result<SandboxChild, SandboxError> {
        Err(SandboxError::Spawn(
            "Linux sandbox is only supported on Linux".into(),
        ))
    }

    async fn teardown(&mut self) -> Result<(), SandboxError> {
        self.user_lock.take();
        Ok(())
    }

    fn bind_mount_paths(&self) -> Vec<SandboxMount> {
        self.config.bind_mounts()
    }
}
