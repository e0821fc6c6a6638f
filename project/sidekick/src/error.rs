//! Error taxonomy of the sidekick.
//!
//! Three severities exist and none of them escalates into the next one:
//! [`TargetError`] and configuration errors are fatal at startup, a
//! [`CycleError`] aborts one poll cycle, and a [`PeerError`] only skips a
//! single peer inside a cycle.

use common::{ObjectKey, ResourceKind, SelectorError};
use thiserror::Error;

/// Failures while resolving which pods belong to the cluster and who we are.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error("cannot find consul pod ({key}): {source:#}")]
    PodLookup {
        key: ObjectKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot determine owner of consul pod ({key}): expected one owner, found {count}")]
    OwnerCount { key: ObjectKey, count: usize },
    #[error("consul pod ({key}) is not controlled by a ReplicaSet (owner {kind} {owner}, controller={controller})")]
    NotReplicaSetOwned {
        key: ObjectKey,
        kind: ResourceKind,
        owner: String,
        controller: bool,
    },
    #[error("cannot access ReplicaSet ({key}): {source:#}")]
    OwnerLookup {
        key: ObjectKey,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid selector on ReplicaSet ({key}): {source}")]
    InvalidSelector {
        key: ObjectKey,
        #[source]
        source: SelectorError,
    },
    #[error("ReplicaSet ({key}) has an empty selector which would select every pod")]
    EmptySelector { key: ObjectKey },
    #[error("consul pod ({key}) has no IP assigned yet")]
    MissingPodIp { key: ObjectKey },
}

/// Failures that abort the current poll cycle only.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("cannot resolve sidekick target: {0}")]
    ResolveTarget(#[from] TargetError),
    #[error("cannot obtain pod IPs (selector: {selector}): {source:#}")]
    ListDesired {
        selector: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot obtain consul peers: {0:#}")]
    ListPeers(#[source] anyhow::Error),
}

/// Failures scoped to a single peer, recorded and skipped.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("cannot parse peer {address:?}: {reason}")]
    InvalidAddress {
        address: String,
        reason: AddressError,
    },
    #[error("cannot force peer {address:?} to leave: {source:#}")]
    ForceLeave {
        address: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot join peer {address:?}: {source:#}")]
    Join {
        address: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PeerError {
    pub fn address(&self) -> &str {
        match self {
            Self::InvalidAddress { address, .. }
            | Self::ForceLeave { address, .. }
            | Self::Join { address, .. } => address,
        }
    }
}

/// Why a `host:port` string could not be split.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("missing port in address")]
    MissingPort,
    #[error("too many colons in address")]
    TooManyColons,
    #[error("missing ']' in address")]
    UnclosedBracket,
    #[error("unexpected '[' or ']' in address")]
    UnexpectedBracket,
    #[error("empty host in address")]
    EmptyHost,
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}
