// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Filesystem-based path locks matching Nix's `PathLocks` semantics.
//!
//! Each store path `<path>` is protected by an exclusive `flock()` on
//! `<path>.lock`. This allows cross-process coordination (multiple daemon
//! instances, GC) without relying on in-process mutexes.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use nix::fcntl::Flock;
use nix::fcntl::FlockArg;

/// An exclusive lock on a store path, backed by `flock()` on `<path>.lock`.
///
/// The lock is released when this value is dropped.
pub struct PathLock {
    _flock: Flock<File>,
    _lock_path: PathBuf,
}

impl PathLock {
    /// Acquire an exclusive lock on `path` (blocking).
    ///
    /// Creates `<path>.lock` if it doesn't exist.
    pub fn lock(path: &Path) -> io::Result<Self> {
        let lock_path = PathBuf::from(format!("{}.lock", path.display()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
            io::Error::new(io::ErrorKind::Other, format!("flock failed: {errno}"))
        })?;

        Ok(Self {
            _flock: flock,
            _lock_path: lock_path,
        })
    }
}
