//! One reconciliation pass for one role key.
//!
//! Reads a snapshot (role, cluster, internal spec, workload status), asks the decision
//! engine what to do, applies it, and turns the outcome into a requeue instruction for
//! the work queue. Errors never escape a pass.

use std::sync::Arc;

use cohort_common::{
    InternalSpec, ObjectKey, Role, RoleStatus, Severity, StatusCode, ROLE_KIND,
};
use cohort_meta::ABSENT;

use crate::action::Requeue;
use crate::client::{ObjectClient, Stored};
use crate::decision::decide;
use crate::error::{ReconcileError, StoreError};
use crate::executor::{ActionExecutor, Versions};
use crate::metrics::SharedMetrics;
use crate::recorder::{reason, EventRecorder};

pub struct Reconciler {
    client: ObjectClient,
    recorder: Arc<dyn EventRecorder>,
    executor: ActionExecutor,
    metrics: Arc<SharedMetrics>,
}

impl Reconciler {
    pub fn new(
        client: ObjectClient,
        recorder: Arc<dyn EventRecorder>,
        metrics: Arc<SharedMetrics>,
    ) -> Self {
        let executor = ActionExecutor::new(client.clone(), recorder.clone(), metrics.clone());
        Self {
            client,
            recorder,
            executor,
            metrics,
        }
    }

    pub async fn reconcile(&self, key: &ObjectKey) -> Requeue {
        SharedMetrics::incr(&self.metrics.reconcile_total);

        let requeue = match self.try_reconcile(key).await {
            Ok(requeue) => requeue,
            Err(e) => {
                SharedMetrics::incr(&self.metrics.reconcile_errors);
                if e.is_conflict() {
                    SharedMetrics::incr(&self.metrics.version_conflicts_total);
                    tracing::debug!(%key, error=%e, "reconcile lost a write race, retrying");
                } else {
                    tracing::warn!(%key, error=%e, "reconcile failed");
                }
                e.requeue()
            }
        };

        match requeue {
            Requeue::Immediate => SharedMetrics::incr(&self.metrics.requeue_immediate_total),
            Requeue::Backoff => SharedMetrics::incr(&self.metrics.requeue_backoff_total),
            Requeue::None => {}
        }
        requeue
    }

    async fn try_reconcile(&self, key: &ObjectKey) -> Result<Requeue, ReconcileError> {
        let Some(role) = self.client.get_role(key).await? else {
            if let Err(e) = self.collect_orphan(key).await {
                tracing::warn!(%key, error=%e, "failed to collect internal spec of deleted role");
            }
            return Ok(Requeue::None);
        };

        let cluster_key = ObjectKey::new(key.namespace.clone(), role.object.spec.cluster.clone());
        let Some(cluster) = self.client.get_cluster(&cluster_key).await? else {
            let message = format!(
                "cluster {} referenced by role {} does not exist",
                cluster_key, key.name
            );
            self.fail(&role, reason::INVALID_ROLE, message).await?;
            return Ok(Requeue::None);
        };

        let existing = match self.client.get_internal_spec(key).await {
            Ok(existing) => existing,
            Err(e @ StoreError::Malformed { .. }) => {
                self.fail(&role, reason::FAILED, e.to_string()).await?;
                return Ok(Requeue::Backoff);
            }
            Err(e) => return Err(e.into()),
        };
        let existing = match existing {
            Some(spec) if from_previous_incarnation(&spec.object, &role.object) => {
                self.collect_stale(key, &spec).await?;
                None
            }
            other => other,
        };

        let observed = match self.client.get_child_status(key).await {
            Ok(observed) => observed.map(|s| s.object),
            Err(e @ StoreError::Malformed { .. }) => {
                tracing::warn!(%key, error=%e, "ignoring unreadable workload status");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let decision = match decide(
            &role.object,
            &cluster.object,
            existing.as_ref().map(|s| &s.object),
            observed.as_ref(),
        ) {
            Ok(decision) => decision,
            Err(e) => {
                self.fail(&role, reason::FAILED, e.to_string()).await?;
                return Ok(Requeue::Backoff);
            }
        };

        if decision.is_noop() {
            tracing::debug!(%key, "role converged");
            return Ok(decision.requeue);
        }
        tracing::debug!(%key, actions=?decision.kinds(), requeue=?decision.requeue, "applying decision");

        let versions = Versions {
            role: role.version,
            internal: existing.as_ref().map_or(ABSENT, |s| s.version),
        };
        self.executor
            .execute(&role.object, versions, &decision)
            .await?;
        Ok(decision.requeue)
    }

    /// Deletes the internal spec left behind by a deleted role.
    async fn collect_orphan(&self, key: &ObjectKey) -> Result<(), ReconcileError> {
        let spec = match self.client.get_internal_spec(key).await {
            Ok(Some(spec)) => spec,
            Ok(None) => return Ok(()),
            Err(e @ StoreError::Malformed { .. }) => {
                tracing::warn!(%key, error=%e, "leaving unreadable internal spec of deleted role");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if !spec.object.metadata.is_owned_by(ROLE_KIND, &key.name, None) {
            return Ok(());
        }
        self.delete_spec(key, &spec, "deleted role").await
    }

    /// Deletes the internal spec a deleted role of the same name left behind, so the
    /// recreated role starts with a fresh create.
    async fn collect_stale(
        &self,
        key: &ObjectKey,
        spec: &Stored<InternalSpec>,
    ) -> Result<(), ReconcileError> {
        self.delete_spec(key, spec, "previous role incarnation").await
    }

    async fn delete_spec(
        &self,
        key: &ObjectKey,
        spec: &Stored<InternalSpec>,
        owner: &str,
    ) -> Result<(), ReconcileError> {
        match self.client.delete_internal_spec(key, spec.version).await {
            Ok(()) | Err(StoreError::NotFound { .. }) => {
                tracing::info!(%key, owner, "deleted orphaned internal spec");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Marks the role Failed with `message`. Repeating the same failure writes nothing.
    async fn fail(
        &self,
        role: &Stored<Role>,
        reason: &str,
        message: String,
    ) -> Result<(), ReconcileError> {
        let current = &role.object.status;
        if current.status == Some(StatusCode::Failed)
            && current.message.as_deref() == Some(message.as_str())
        {
            return Ok(());
        }

        let key = role.object.metadata.key();
        self.recorder
            .emit(&key, Severity::Warning, reason, message.clone())
            .await;
        let status = RoleStatus {
            status: Some(StatusCode::Failed),
            message: Some(message),
            ..current.clone()
        };
        self.client
            .update_role_status(&role.object, &status, role.version)
            .await?;
        Ok(())
    }
}

/// The spec names this role's kind and name but a different uid.
fn from_previous_incarnation(spec: &InternalSpec, role: &Role) -> bool {
    let meta = &spec.metadata;
    let name = &role.metadata.name;
    meta.is_owned_by(ROLE_KIND, name, None)
        && !meta.is_owned_by(ROLE_KIND, name, role.metadata.uid.as_deref())
}
