use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use cohort_common::{EventRecord, ObjectKey, Severity, EVENTS_PREFIX};
use cohort_meta::MetaStore;

/// Reason codes attached to role events.
pub mod reason {
    pub const CREATED: &str = "SuccessfulCreate";
    pub const FAILED_CREATE: &str = "FailedCreate";
    pub const UPDATED: &str = "SuccessfulUpdate";
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    pub const SCALING: &str = "Scaling";
    pub const FAILED_SCALE: &str = "FailedScale";
    pub const STATUS_SYNCED: &str = "StatusSynced";
    pub const FAILED_STATUS_SYNC: &str = "FailedStatusSync";
    pub const INVALID_ROLE: &str = "InvalidRole";
    pub const FAILED: &str = "Failed";
}

/// Sink for human-readable notifications about a role.
///
/// Emitting never fails a reconciliation; implementations log their own errors.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn emit(&self, subject: &ObjectKey, severity: Severity, reason: &str, message: String);
}

/// Logs every event and persists it under the events prefix with a TTL lease.
pub struct StoreRecorder {
    store: Arc<dyn MetaStore>,
    ttl: Option<Duration>,
}

impl StoreRecorder {
    pub fn new(store: Arc<dyn MetaStore>, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }
}

#[async_trait]
impl EventRecorder for StoreRecorder {
    async fn emit(&self, subject: &ObjectKey, severity: Severity, reason: &str, message: String) {
        match severity {
            Severity::Normal => {
                tracing::info!(namespace=%subject.namespace, name=%subject.name, reason, "{message}")
            }
            Severity::Warning => {
                tracing::warn!(namespace=%subject.namespace, name=%subject.name, reason, "{message}")
            }
        }

        let record = EventRecord::new(subject, severity, reason, message);
        let value = match serde_json::to_vec(&record) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error=%e, "failed to serialize event");
                return;
            }
        };
        let ttl_ms = self.ttl.map(|t| t.as_millis() as u64);
        if let Err(e) = self
            .store
            .put(&record.store_key(EVENTS_PREFIX), value, ttl_ms)
            .await
        {
            tracing::warn!(%subject, error=%e, "failed to persist event");
        }
    }
}

/// Events recorded for `subject`, oldest first.
pub async fn list_events(
    store: &dyn MetaStore,
    subject: &ObjectKey,
) -> anyhow::Result<Vec<EventRecord>> {
    let prefix = format!("{}/", subject.store_key(EVENTS_PREFIX));
    let mut events = store
        .list_prefix(&prefix)
        .await?
        .into_iter()
        .filter_map(|(_, v)| serde_json::from_slice::<EventRecord>(&v.value).ok())
        .collect::<Vec<_>>();
    events.sort_by_key(|e| e.timestamp);
    Ok(events)
}
