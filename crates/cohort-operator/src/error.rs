use std::fmt;

use cohort_common::ObjectKey;
use thiserror::Error;

use crate::action::{ActionKind, Requeue};

/// Kinds of stored documents, used to give store errors context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Role,
    Cluster,
    InternalSpec,
    Workload,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Role => "role",
            ObjectKind::Cluster => "cluster",
            ObjectKind::InternalSpec => "internal spec",
            ObjectKind::Workload => "workload",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: ObjectKind, key: ObjectKey },

    #[error("{kind} {key} changed concurrently (expected version {expected}, found {current})")]
    VersionConflict {
        kind: ObjectKind,
        key: ObjectKey,
        expected: u64,
        current: u64,
    },

    #[error("{kind} {key} is malformed: {reason}")]
    Malformed {
        kind: ObjectKind,
        key: ObjectKey,
        reason: String,
    },

    #[error("store backend failure: {0:#}")]
    Backend(anyhow::Error),
}

/// A failed action, with the action that failed.
#[derive(Debug, Error)]
#[error("{action} failed: {source}")]
pub struct ExecError {
    pub action: ActionKind,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Exec(#[from] ExecError),
}

impl ReconcileError {
    pub fn store_error(&self) -> &StoreError {
        match self {
            ReconcileError::Store(e) => e,
            ReconcileError::Exec(e) => &e.source,
        }
    }

    /// Retry cadence for an error that escaped a reconciliation.
    ///
    /// A role that vanished mid-cycle is a normal deletion race and is not retried; every
    /// other failure is retried with backoff from a fresh read.
    pub fn requeue(&self) -> Requeue {
        match self.store_error() {
            StoreError::NotFound {
                kind: ObjectKind::Role,
                ..
            } => Requeue::None,
            _ => Requeue::Backoff,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self.store_error(), StoreError::VersionConflict { .. })
    }
}
