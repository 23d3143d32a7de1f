//! BuildResult types for the daemon wire protocol.

use std::collections::BTreeMap;

use num_enum::{IntoPrimitive, TryFromPrimitive};
#[cfg(test)]
use test_strategy::Arbitrary;

use crate::daemon_wire::types2::Microseconds;
use crate::types::{DaemonInt, DaemonString, DaemonTime};
use zb_protocol_derive::{NixDeserialize, NixSerialize};
use zb_store_core::derived_path::DerivedPath;
use zb_store_core::realisation::{DrvOutput, Realisation};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    TryFromPrimitive,
    IntoPrimitive,
    NixDeserialize,
    NixSerialize,
)]
#[nix(try_from = "u16", into = "u16")]
#[repr(u16)]
pub enum BuildStatus {
    Built = 0,
    Substituted = 1,
    AlreadyValid = 2,
    PermanentFailure = 3,
    InputRejected = 4,
    OutputRejected = 5,
    TransientFailure = 6,
    CachedFailure = 7,
    TimedOut = 8,
    MiscFailure = 9,
    DependencyFailed = 10,
    LogLimitExceeded = 11,
    NotDeterministic = 12,
    ResolvesToAlreadyValid = 13,
    NoSubstituters = 14,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, NixDeserialize, NixSerialize)]
pub struct BuildResult {
    pub status: BuildStatus,
    pub error_msg: DaemonString,
    pub times_built: DaemonInt,
    pub is_non_deterministic: bool,
    pub start_time: DaemonTime,
    pub stop_time: DaemonTime,
    pub cpu_user: Option<Microseconds>,
    pub cpu_system: Option<Microseconds>,
    pub built_outputs: BTreeMap<DrvOutput, Realisation>,
}

pub type KeyedBuildResults = Vec<KeyedBuildResult>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, NixDeserialize, NixSerialize)]
#[cfg_attr(test, derive(Arbitrary))]
pub struct KeyedBuildResult {
    pub path: DerivedPath,
    pub result: BuildResult,
}
