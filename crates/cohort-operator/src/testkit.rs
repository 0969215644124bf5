//! Fixtures shared by the operator's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use cohort_common::{
    Cluster, ClusterSpec, ObjectKey, ObjectMeta, Role, RoleSpec, RoleStatus, WorkloadStatus,
    CLUSTERS_PREFIX, ROLES_PREFIX, WORKLOADS_PREFIX,
};
use cohort_meta::{
    CasOutcome, MemoryMetaStore, MetaStore, PrefixSnapshot, Versioned, WatchStream,
};

use crate::client::ObjectClient;
use crate::recorder::{EventRecorder, StoreRecorder};

pub const NAMESPACE: &str = "default";

/// Cluster `default/demo` with the given cluster-wide parameters.
pub fn cluster(parameters: Value) -> Cluster {
    Cluster {
        metadata: ObjectMeta::new(NAMESPACE, "demo"),
        spec: ClusterSpec {
            parameters,
            ..ClusterSpec::default()
        },
    }
}

/// Role `default/demo-storage` of cluster `demo`.
pub fn role(replicas: Option<u32>, parameters: Value) -> Role {
    let mut metadata = ObjectMeta::new(NAMESPACE, "demo-storage");
    metadata.uid = Some("3f1c9a52-demo-storage".to_string());
    Role {
        metadata,
        spec: RoleSpec {
            role: "storage".to_string(),
            cluster: "demo".to_string(),
            replicas,
            parameters,
        },
        status: RoleStatus::default(),
    }
}

pub fn memory_client() -> ObjectClient {
    ObjectClient::new(Arc::new(MemoryMetaStore::new()))
}

pub fn recorder(client: &ObjectClient) -> Arc<dyn EventRecorder> {
    Arc::new(StoreRecorder::new(client.store().clone(), None))
}

/// Unconditional write of a user-owned document, the way a user or the platform would.
async fn put<T: Serialize>(
    client: &ObjectClient,
    prefix: &str,
    key: &ObjectKey,
    object: &T,
) -> u64 {
    let value = serde_json::to_vec(object).unwrap();
    client
        .store()
        .put(&key.store_key(prefix), value, None)
        .await
        .unwrap()
}

pub async fn seed_role(client: &ObjectClient, role: &Role) -> u64 {
    put(client, ROLES_PREFIX, &role.metadata.key(), role).await
}

pub async fn seed_cluster(client: &ObjectClient, cluster: &Cluster) -> u64 {
    put(client, CLUSTERS_PREFIX, &cluster.metadata.key(), cluster).await
}

pub async fn seed_workload(client: &ObjectClient, key: &ObjectKey, current: u32, ready: u32) -> u64 {
    let status = WorkloadStatus {
        replicas: current,
        current_replicas: current,
        ready_replicas: ready,
    };
    put(client, WORKLOADS_PREFIX, key, &status).await
}

/// Memory store with injectable faults.
///
/// `fail_all` turns every call into a backend error. `race_next_write` makes the next
/// conditional write to the given key lose a race against a concurrent writer.
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryMetaStore,
    fail_all: AtomicBool,
    race: Mutex<Option<String>>,
}

impl FaultyStore {
    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::SeqCst);
    }

    pub fn race_next_write(&self, key: String) {
        *self.race.lock().unwrap() = Some(key);
    }

    fn check(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            anyhow::bail!("injected backend failure");
        }
        Ok(())
    }

    async fn maybe_race(&self, key: &str) -> Result<()> {
        let hit = {
            let mut race = self.race.lock().unwrap();
            if race.as_deref() == Some(key) {
                race.take()
            } else {
                None
            }
        };
        if hit.is_some() {
            if let Some(current) = self.inner.get(key).await? {
                self.inner.put(key, current.value, None).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl MetaStore for FaultyStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn snapshot_prefix(&self, prefix: &str) -> Result<PrefixSnapshot> {
        self.check()?;
        self.inner.snapshot_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64> {
        self.check()?;
        self.inner.put(key, value, ttl_ms).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        self.check()?;
        self.maybe_race(key).await?;
        self.inner.compare_and_swap(key, expected_revision, value).await
    }

    async fn compare_and_delete(&self, key: &str, expected_revision: u64) -> Result<CasOutcome> {
        self.check()?;
        self.maybe_race(key).await?;
        self.inner.compare_and_delete(key, expected_revision).await
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        self.check()?;
        self.inner.watch_prefix(prefix, start_revision_exclusive).await
    }
}
