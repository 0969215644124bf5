use std::sync::Arc;

use cohort_common::{ObjectKey, Role, RoleStatus, Severity};

use crate::action::{Action, ActionKind, Decision};
use crate::client::ObjectClient;
use crate::error::{ExecError, StoreError};
use crate::metrics::SharedMetrics;
use crate::recorder::{reason, EventRecorder};

/// Store versions observed when the cycle's snapshot was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Versions {
    pub role: u64,
    /// `ABSENT` when no internal spec existed.
    pub internal: u64,
}

/// Applies a decision's actions in order, then its status transition.
///
/// Every write is conditional on the version read at the start of the cycle (or the
/// version this executor itself produced earlier in the batch). The first failure aborts
/// the batch.
pub struct ActionExecutor {
    client: ObjectClient,
    recorder: Arc<dyn EventRecorder>,
    metrics: Arc<SharedMetrics>,
}

impl ActionExecutor {
    pub fn new(
        client: ObjectClient,
        recorder: Arc<dyn EventRecorder>,
        metrics: Arc<SharedMetrics>,
    ) -> Self {
        Self {
            client,
            recorder,
            metrics,
        }
    }

    pub async fn execute(
        &self,
        role: &Role,
        versions: Versions,
        decision: &Decision,
    ) -> Result<(), ExecError> {
        let subject = role.metadata.key();
        let mut versions = versions;

        for action in &decision.actions {
            let result = self.apply(role, &mut versions, action).await;
            self.notify(&subject, role, action, &result).await;
            result.map_err(|source| ExecError {
                action: action.kind(),
                source,
            })?;
        }

        if let Some(status) = &decision.status {
            if let Err(source) = self.write_status(role, &mut versions, status).await {
                self.recorder
                    .emit(
                        &subject,
                        Severity::Warning,
                        reason::FAILED,
                        format!("updating status of role {} failed: {source}", subject.name),
                    )
                    .await;
                return Err(ExecError {
                    action: ActionKind::StatusUpdate,
                    source,
                });
            }
        }

        Ok(())
    }

    async fn apply(
        &self,
        role: &Role,
        versions: &mut Versions,
        action: &Action,
    ) -> Result<(), StoreError> {
        let namespace = &role.metadata.namespace;
        let name = &role.metadata.name;
        match action {
            Action::Create(spec) => {
                tracing::info!(%namespace, %name, replicas = spec.replicas, "creating internal spec");
                versions.internal = self.client.create_internal_spec(spec).await?;
                SharedMetrics::incr(&self.metrics.creates_total);
            }
            Action::Upgrade(spec) => {
                tracing::info!(%namespace, %name, replicas = spec.replicas, "rolling upgrade of internal spec");
                versions.internal = self
                    .client
                    .replace_internal_spec(spec, versions.internal)
                    .await?;
                SharedMetrics::incr(&self.metrics.upgrades_total);
            }
            Action::Scale { from, to, spec } => {
                tracing::info!(%namespace, %name, from, to, "scaling internal spec");
                versions.internal = self
                    .client
                    .replace_internal_spec(spec, versions.internal)
                    .await?;
                let counter = if to > from {
                    &self.metrics.scale_up_total
                } else {
                    &self.metrics.scale_down_total
                };
                SharedMetrics::incr(counter);
            }
            Action::StatusSync(status) => {
                tracing::debug!(
                    %namespace,
                    %name,
                    current = status.current_replicas,
                    ready = status.ready_replicas,
                    "syncing role status"
                );
                self.write_status(role, versions, status).await?;
                SharedMetrics::incr(&self.metrics.status_syncs_total);
            }
        }
        Ok(())
    }

    async fn write_status(
        &self,
        role: &Role,
        versions: &mut Versions,
        status: &RoleStatus,
    ) -> Result<(), StoreError> {
        versions.role = self
            .client
            .update_role_status(role, status, versions.role)
            .await?;
        Ok(())
    }

    async fn notify(
        &self,
        subject: &ObjectKey,
        role: &Role,
        action: &Action,
        result: &Result<(), StoreError>,
    ) {
        let name = &role.metadata.name;
        let (severity, reason, message) = match (action, result) {
            (Action::Create(spec), Ok(())) => (
                Severity::Normal,
                reason::CREATED,
                format!("created internal spec {name} with {} replicas", spec.replicas),
            ),
            (Action::Create(_), Err(e)) => (
                Severity::Warning,
                reason::FAILED_CREATE,
                format!("creating internal spec {name} failed: {e}"),
            ),
            (Action::Upgrade(spec), Ok(())) => (
                Severity::Normal,
                reason::UPDATED,
                format!(
                    "updated internal spec {name}, rolling upgrade at {} replicas",
                    spec.replicas
                ),
            ),
            (Action::Upgrade(_), Err(e)) => (
                Severity::Warning,
                reason::FAILED_UPDATE,
                format!("updating internal spec {name} failed: {e}"),
            ),
            (Action::Scale { from, to, .. }, Ok(())) => (
                Severity::Normal,
                reason::SCALING,
                format!("scaled role {name} from {from} to {to} replicas"),
            ),
            (Action::Scale { from, to, .. }, Err(e)) => (
                Severity::Warning,
                reason::FAILED_SCALE,
                format!("scaling role {name} from {from} to {to} replicas failed: {e}"),
            ),
            (Action::StatusSync(status), Ok(())) => (
                Severity::Normal,
                reason::STATUS_SYNCED,
                format!(
                    "role {name} has {} current and {} ready replicas",
                    status.current_replicas, status.ready_replicas
                ),
            ),
            (Action::StatusSync(_), Err(e)) => (
                Severity::Warning,
                reason::FAILED_STATUS_SYNC,
                format!("syncing status of role {name} failed: {e}"),
            ),
        };
        self.recorder.emit(subject, severity, reason, message).await;
    }
}
