//! Typed access to the documents the operator reads and writes.
//!
//! Reads return the document together with the version it was read at; every write is
//! conditional on such a version.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use cohort_common::{
    namespace_prefix, Cluster, InternalSpec, ObjectKey, Role, RoleStatus, WorkloadStatus,
    CLUSTERS_PREFIX, INTERNAL_PREFIX, ROLES_PREFIX, WORKLOADS_PREFIX,
};
use cohort_meta::{CasOutcome, MetaStore, ABSENT};

use crate::error::{ObjectKind, StoreError};

/// A document and the store version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub object: T,
    pub version: u64,
}

#[derive(Clone)]
pub struct ObjectClient {
    store: Arc<dyn MetaStore>,
}

impl ObjectClient {
    pub fn new(store: Arc<dyn MetaStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetaStore> {
        &self.store
    }

    pub async fn get_role(&self, key: &ObjectKey) -> Result<Option<Stored<Role>>, StoreError> {
        self.get(ObjectKind::Role, ROLES_PREFIX, key).await
    }

    pub async fn get_cluster(&self, key: &ObjectKey) -> Result<Option<Stored<Cluster>>, StoreError> {
        self.get(ObjectKind::Cluster, CLUSTERS_PREFIX, key).await
    }

    pub async fn get_internal_spec(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Stored<InternalSpec>>, StoreError> {
        self.get(ObjectKind::InternalSpec, INTERNAL_PREFIX, key)
            .await
    }

    /// Status of the child workload, which shares the role's name.
    pub async fn get_child_status(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Stored<WorkloadStatus>>, StoreError> {
        self.get(ObjectKind::Workload, WORKLOADS_PREFIX, key).await
    }

    /// Lists roles, optionally within one namespace. Undecodable documents are skipped.
    pub async fn list_roles(&self, namespace: Option<&str>) -> Result<Vec<Stored<Role>>, StoreError> {
        let prefix = match namespace {
            Some(ns) => namespace_prefix(ROLES_PREFIX, ns),
            None => ROLES_PREFIX.to_string(),
        };
        let kvs = self
            .store
            .list_prefix(&prefix)
            .await
            .map_err(StoreError::Backend)?;

        let mut roles = Vec::with_capacity(kvs.len());
        for (key, versioned) in kvs {
            match serde_json::from_slice::<Role>(&versioned.value) {
                Ok(role) => roles.push(Stored {
                    object: role,
                    version: versioned.revision,
                }),
                Err(e) => tracing::warn!(%key, error=%e, "skipping undecodable role"),
            }
        }
        Ok(roles)
    }

    /// Fails with `VersionConflict` if the spec already exists.
    pub async fn create_internal_spec(&self, spec: &InternalSpec) -> Result<u64, StoreError> {
        let key = spec.metadata.key();
        let value = encode(ObjectKind::InternalSpec, &key, spec)?;
        let outcome = self
            .store
            .create(&key.store_key(INTERNAL_PREFIX), value)
            .await
            .map_err(StoreError::Backend)?;
        applied(ObjectKind::InternalSpec, key, ABSENT, outcome)
    }

    /// Replaces the whole spec if it is still at `expected_version`.
    pub async fn replace_internal_spec(
        &self,
        spec: &InternalSpec,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let key = spec.metadata.key();
        let value = encode(ObjectKind::InternalSpec, &key, spec)?;
        self.swap(ObjectKind::InternalSpec, INTERNAL_PREFIX, key, expected_version, value)
            .await
    }

    /// Writes `status` onto the role document read at `expected_version`.
    pub async fn update_role_status(
        &self,
        role: &Role,
        status: &RoleStatus,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let key = role.metadata.key();
        let mut updated = role.clone();
        updated.status = status.clone();
        let value = encode(ObjectKind::Role, &key, &updated)?;
        self.swap(ObjectKind::Role, ROLES_PREFIX, key, expected_version, value)
            .await
    }

    pub async fn delete_internal_spec(
        &self,
        key: &ObjectKey,
        expected_version: u64,
    ) -> Result<(), StoreError> {
        let outcome = self
            .store
            .compare_and_delete(&key.store_key(INTERNAL_PREFIX), expected_version)
            .await
            .map_err(StoreError::Backend)?;
        applied(ObjectKind::InternalSpec, key.clone(), expected_version, outcome).map(|_| ())
    }

    async fn get<T: DeserializeOwned>(
        &self,
        kind: ObjectKind,
        prefix: &str,
        key: &ObjectKey,
    ) -> Result<Option<Stored<T>>, StoreError> {
        let Some(versioned) = self
            .store
            .get(&key.store_key(prefix))
            .await
            .map_err(StoreError::Backend)?
        else {
            return Ok(None);
        };

        let object = serde_json::from_slice(&versioned.value).map_err(|e| StoreError::Malformed {
            kind,
            key: key.clone(),
            reason: e.to_string(),
        })?;
        Ok(Some(Stored {
            object,
            version: versioned.revision,
        }))
    }

    async fn swap(
        &self,
        kind: ObjectKind,
        prefix: &str,
        key: ObjectKey,
        expected_version: u64,
        value: Vec<u8>,
    ) -> Result<u64, StoreError> {
        let outcome = self
            .store
            .compare_and_swap(&key.store_key(prefix), expected_version, value)
            .await
            .map_err(StoreError::Backend)?;
        applied(kind, key, expected_version, outcome)
    }
}

fn encode<T: Serialize>(kind: ObjectKind, key: &ObjectKey, object: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(object).map_err(|e| StoreError::Malformed {
        kind,
        key: key.clone(),
        reason: e.to_string(),
    })
}

fn applied(
    kind: ObjectKind,
    key: ObjectKey,
    expected: u64,
    outcome: CasOutcome,
) -> Result<u64, StoreError> {
    match outcome {
        CasOutcome::Applied(version) => Ok(version),
        CasOutcome::Conflict { current: ABSENT } if expected != ABSENT => {
            Err(StoreError::NotFound { kind, key })
        }
        CasOutcome::Conflict { current } => Err(StoreError::VersionConflict {
            kind,
            key,
            expected,
            current,
        }),
    }
}
