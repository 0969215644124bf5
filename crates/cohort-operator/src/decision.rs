//! The role reconciliation decision engine.
//!
//! A pure function of the desired role, its cluster, the previously materialized
//! internal spec and the observed workload status. It never touches the store, so every
//! ordering rule is testable without infrastructure.
//!
//! When a scale and a template change arrive together, the upgrade and the scale happen
//! on separate passes:
//! - scaling up: upgrade first (at the current replica count), then scale, so new
//!   replicas start on the new template;
//! - scaling down: scale first, then upgrade, so replicas about to be removed are not
//!   upgraded.
//!
//! Every create and upgrade stamps the internal spec with a new generation and the status
//! code it implies. A status transition whose write was lost is written again once the
//! replica counts match, because the role's recorded generation lags behind the spec's.

use std::cmp::Ordering;

use cohort_common::{
    Cluster, InternalSpec, MergeError, Role, RoleStatus, StatusCode, WorkloadStatus,
};

use crate::action::{Action, Decision, Requeue};

pub fn decide(
    role: &Role,
    cluster: &Cluster,
    existing: Option<&InternalSpec>,
    observed: Option<&WorkloadStatus>,
) -> Result<Decision, MergeError> {
    let desired_replicas = role.desired_replicas(cluster);

    let Some(existing) = existing else {
        if desired_replicas == 0 {
            return Ok(Decision::noop());
        }
        let desired = InternalSpec::merge(cluster, role)?;
        return Ok(create(role, desired.rolled_out(0, StatusCode::Created)));
    };

    let desired = InternalSpec::merge(cluster, role)?;
    let current_replicas = existing.replicas;
    let is_upgrade = !existing.same_template(&desired);

    let decision = match current_replicas.cmp(&desired_replicas) {
        Ordering::Less if is_upgrade => {
            upgrade(role, existing, desired.with_replicas(current_replicas), Requeue::Immediate)
        }
        Ordering::Less => scale(existing, desired_replicas, Requeue::None),
        Ordering::Greater => {
            let requeue = if is_upgrade {
                Requeue::Immediate
            } else {
                Requeue::None
            };
            scale(existing, desired_replicas, requeue)
        }
        Ordering::Equal if is_upgrade => upgrade(role, existing, desired, Requeue::None),
        Ordering::Equal => match unrecorded_transition(role, existing) {
            Some(status) => Decision {
                actions: Vec::new(),
                status: Some(status),
                requeue: Requeue::None,
            },
            None => sync_status(role, desired_replicas, observed),
        },
    };

    Ok(decision)
}

fn create(role: &Role, desired: InternalSpec) -> Decision {
    let mut status = transition(role, &desired);
    status.replicas = desired.replicas;
    Decision {
        actions: vec![Action::Create(desired)],
        status: Some(status),
        requeue: Requeue::None,
    }
}

fn upgrade(
    role: &Role,
    existing: &InternalSpec,
    desired: InternalSpec,
    requeue: Requeue,
) -> Decision {
    let desired = desired.rolled_out(existing.generation, StatusCode::RollingUpgrade);
    Decision {
        status: Some(transition(role, &desired)),
        actions: vec![Action::Upgrade(desired)],
        requeue,
    }
}

/// The create or upgrade transition `existing` carries but the role never recorded.
fn unrecorded_transition(role: &Role, existing: &InternalSpec) -> Option<RoleStatus> {
    let recorded = &role.status;
    if existing.generation > recorded.observed_generation {
        let mut status = transition(role, existing);
        if existing.rollout == Some(StatusCode::Created) {
            status.replicas = existing.replicas;
        }
        return Some(status);
    }
    if recorded.status.is_none() {
        // Materialized before generations were recorded.
        let mut status = transition(role, existing);
        status.status = Some(StatusCode::Created);
        status.replicas = existing.replicas;
        return Some(status);
    }
    None
}

// Template is left as it is; only the replica count moves.
fn scale(existing: &InternalSpec, to: u32, requeue: Requeue) -> Decision {
    Decision {
        actions: vec![Action::Scale {
            from: existing.replicas,
            to,
            spec: existing.clone().with_replicas(to),
        }],
        status: None,
        requeue,
    }
}

fn sync_status(role: &Role, desired_replicas: u32, observed: Option<&WorkloadStatus>) -> Decision {
    let Some(observed) = observed else {
        return Decision::noop();
    };
    let recorded = &role.status;
    if observed.current_replicas == recorded.current_replicas
        && observed.ready_replicas == recorded.ready_replicas
    {
        return Decision::noop();
    }

    let mut status = recorded.clone();
    status.current_replicas = observed.current_replicas;
    status.ready_replicas = observed.ready_replicas;
    if observed.ready_replicas == desired_replicas {
        status.status = Some(StatusCode::Ready);
        status.message = None;
    }

    Decision {
        actions: vec![Action::StatusSync(status)],
        status: None,
        requeue: Requeue::None,
    }
}

fn transition(role: &Role, spec: &InternalSpec) -> RoleStatus {
    RoleStatus {
        status: spec.rollout,
        selector: role.selector(),
        observed_generation: spec.generation,
        message: None,
        ..role.status.clone()
    }
}
