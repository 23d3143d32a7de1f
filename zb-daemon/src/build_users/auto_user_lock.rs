// SPDX-FileCopyrightText: 2026 Jörg Thalheim
// SPDX-License-Identifier: MIT

//! Auto-allocated build users for Linux, matching Nix's `AutoUserLock`.
//!
//! Divides a UID range into slots of 65536 (`maxIdsPerBuild`) and uses
//! file locks in `<stateDir>/userpool2/slot-<N>` for cross-process
//! coordination.

use std::fs;
use std::io::{self, ErrorKind};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::unistd::{Uid, User};

use super::UserLock;

/// Maximum UIDs per build slot on Linux (2^16 for full uid_map range).
/// Matches Nix's `maxIdsPerBuild`.
pub const MAX_IDS_PER_BUILD: u32 = 1 << 16;

/// Resolve the userpool2 directory (matches Nix's auto-allocate path).
pub fn auto_pool_dir(state_dir: &Path) -> PathBuf {
    state_dir.join("userpool2")
}

/// Acquire a build user via auto-allocated UID slots.
///
/// Divides `id_count` UIDs starting at `start_id` into slots of
/// `MAX_IDS_PER_BUILD`. Tries each slot's lock file in
/// `<pool_dir>/slot-<N>`. Returns `None` if all slots are busy.
///
/// With user namespaces, GID == UID (mapped inside the namespace).
pub fn acquire_auto_user_lock(
    pool_dir: &Path,
    start_id: u32,
    id_count: u32,
    nr_ids: u32,
) -> std::io::Result<Option<UserLock>> {
    assert!(start_id > 0);
    assert!(id_count.is_multiple_of(MAX_IDS_PER_BUILD));
    assert!(
        (start_id as u64) + (id_count as u64) <= u32::MAX as u64,
        "UID range overflows u32"
    );
    assert!(nr_ids <= MAX_IDS_PER_BUILD);

    fs::create_dir_all(pool_dir)?;

    let nr_slots = id_count / MAX_IDS_PER_BUILD;

    for i in 0..nr_slots {
        let lock_path = pool_dir.join(format!("slot-{i}"));

        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(0o600)
            .open(&lock_path)?;

        // Try non-blocking exclusive lock
        let fd = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
            Ok(fd) => fd,
            Err((_, Errno::EWOULDBLOCK | Errno::EINTR)) => continue, // Slot is busy
            Err((_, errno)) => return Err(errno.into()),             // Real error
        };

        let first_uid = Uid::from_raw(start_id + i * MAX_IDS_PER_BUILD);

        // Safety: reject UIDs that collide with real system users.
        // Matches Nix's `getpwuid(firstUid)` check in AutoUserLock::acquire.
        if let Ok(Some(user)) = User::from_uid(first_uid) {
            return Err(io::Error::new(
                ErrorKind::AddrInUse,
                format!(
                    "auto-allocated UID {} clashes with existing user account '{}'",
                    first_uid, user.name
                ),
            ));
        }

        return Ok(Some(UserLock {
            _fd: fd,
            first_uid,
            first_gid: nix::unistd::Gid::from_raw(first_uid.as_raw()),
            nr_ids,
            supplementary_gids: Vec::new(),
        }));
    }

    Ok(None)
}
