//! Turns store changes into role keys on the work queue.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use cohort_common::{
    ObjectKey, CLUSTERS_PREFIX, INTERNAL_PREFIX, ROLES_PREFIX, WORKLOADS_PREFIX,
};

use crate::client::ObjectClient;
use crate::error::StoreError;
use crate::queue::WorkQueue;

const RETRY_DELAY: Duration = Duration::from_secs(5);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A watched document kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Roles,
    /// Internal specs share their role's key.
    InternalSpecs,
    /// Workload statuses share their role's key.
    Workloads,
    /// A cluster change fans out to the roles that reference it.
    Clusters,
}

impl Source {
    pub const ALL: [Source; 4] = [
        Source::Roles,
        Source::InternalSpecs,
        Source::Workloads,
        Source::Clusters,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            Source::Roles => ROLES_PREFIX,
            Source::InternalSpecs => INTERNAL_PREFIX,
            Source::Workloads => WORKLOADS_PREFIX,
            Source::Clusters => CLUSTERS_PREFIX,
        }
    }
}

pub struct Watcher {
    client: ObjectClient,
    queue: Arc<WorkQueue>,
}

impl Watcher {
    pub fn new(client: ObjectClient, queue: Arc<WorkQueue>) -> Self {
        Self { client, queue }
    }

    /// Lists `source`, then follows its changes until `shutdown`. Reconnects (and
    /// re-lists) whenever the stream breaks.
    pub async fn run(&self, source: Source, shutdown: CancellationToken) {
        let prefix = source.prefix();
        loop {
            let mut start_rev = match self.list(source).await {
                Ok(rev) => rev,
                Err(e) => {
                    tracing::warn!(prefix, error=%e, "initial list failed, will retry");
                    if sleep_or_shutdown(RETRY_DELAY, &shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            tracing::info!(prefix, start_rev, "watching");
            let mut stream = match self.client.store().watch_prefix(prefix, Some(start_rev)).await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::warn!(prefix, error=%e, "failed to watch, will retry");
                    if sleep_or_shutdown(RETRY_DELAY, &shutdown).await {
                        return;
                    }
                    continue;
                }
            };

            loop {
                let ev = tokio::select! {
                    _ = shutdown.cancelled() => return,
                    ev = stream.next() => ev,
                };
                let Some(ev) = ev else { break };
                start_rev = start_rev.max(ev.revision);
                let Some(key) = ObjectKey::from_store_key(prefix, &ev.key) else {
                    continue;
                };
                if let Err(e) = self.dispatch(source, key).await {
                    tracing::warn!(prefix, error=%e, "failed to map change to roles");
                }
            }

            tracing::warn!(prefix, start_rev, "watch stream ended, reconnecting");
            if sleep_or_shutdown(RECONNECT_DELAY, &shutdown).await {
                return;
            }
        }
    }

    /// Enqueues every listed key and returns the store revision of the listing.
    async fn list(&self, source: Source) -> Result<u64, StoreError> {
        let prefix = source.prefix();
        let snapshot = self
            .client
            .store()
            .snapshot_prefix(prefix)
            .await
            .map_err(StoreError::Backend)?;

        for (raw, _) in snapshot.items {
            if let Some(key) = ObjectKey::from_store_key(prefix, &raw) {
                self.dispatch(source, key).await?;
            }
        }
        Ok(snapshot.revision)
    }

    async fn dispatch(&self, source: Source, key: ObjectKey) -> Result<(), StoreError> {
        match source {
            Source::Roles | Source::InternalSpecs | Source::Workloads => {
                self.queue.enqueue(key);
            }
            Source::Clusters => {
                for role in self.client.list_roles(Some(&key.namespace)).await? {
                    if role.object.spec.cluster == key.name {
                        self.queue.enqueue(role.object.metadata.key());
                    }
                }
            }
        }
        Ok(())
    }
}

/// Periodically enqueues every role so missed changes are eventually noticed.
pub async fn resync_loop(
    client: ObjectClient,
    queue: Arc<WorkQueue>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The watchers' initial list covers the first tick.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        match client.list_roles(None).await {
            Ok(roles) => {
                tracing::debug!(roles = roles.len(), "periodic resync");
                for role in roles {
                    queue.enqueue(role.object.metadata.key());
                }
            }
            Err(e) => tracing::warn!(error=%e, "periodic resync failed"),
        }
    }
}

/// Returns true if shutdown fired first.
async fn sleep_or_shutdown(delay: Duration, shutdown: &CancellationToken) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
