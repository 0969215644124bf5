use std::fmt;

use cohort_common::{InternalSpec, RoleStatus};

/// What the work queue should do with a key once a reconciliation finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Converged, or failed in a way only an input change can fix.
    None,
    /// The ordering policy needs another pass right away.
    Immediate,
    /// Transient failure; retry after the key's backoff delay.
    Backoff,
}

/// A single mutation of the object store.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// First materialization of the role's internal spec.
    Create(InternalSpec),
    /// Replace the internal spec with a new template.
    Upgrade(InternalSpec),
    /// Replace the internal spec with only the replica count changed.
    Scale {
        from: u32,
        to: u32,
        spec: InternalSpec,
    },
    /// Record observed replica counts on the role's status.
    StatusSync(RoleStatus),
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Create(_) => ActionKind::Create,
            Action::Upgrade(_) => ActionKind::Upgrade,
            Action::Scale { .. } => ActionKind::Scale,
            Action::StatusSync(_) => ActionKind::StatusSync,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Create,
    Upgrade,
    Scale,
    StatusSync,
    /// The status transition written after a decision's actions.
    StatusUpdate,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionKind::Create => "create",
            ActionKind::Upgrade => "upgrade",
            ActionKind::Scale => "scale",
            ActionKind::StatusSync => "status-sync",
            ActionKind::StatusUpdate => "status-update",
        };
        f.write_str(s)
    }
}

/// Output of one pass of the decision engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Applied in order; the first failure aborts the rest.
    pub actions: Vec<Action>,
    /// Status transition written after every action succeeded.
    pub status: Option<RoleStatus>,
    pub requeue: Requeue,
}

impl Decision {
    pub fn noop() -> Self {
        Self {
            actions: Vec::new(),
            status: None,
            requeue: Requeue::None,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.actions.is_empty() && self.status.is_none()
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(Action::kind).collect()
    }
}
