use std::fmt;

use serde::{Deserialize, Serialize};

/// Store prefix for `Cluster` documents.
pub const CLUSTERS_PREFIX: &str = "/cohort/clusters/";
/// Store prefix for `Role` documents (spec and status subresource).
pub const ROLES_PREFIX: &str = "/cohort/roles/";
/// Store prefix for materialized `InternalSpec` documents.
pub const INTERNAL_PREFIX: &str = "/cohort/internal/";
/// Store prefix for child workload status documents.
pub const WORKLOADS_PREFIX: &str = "/cohort/workloads/";
/// Store prefix for notification records.
pub const EVENTS_PREFIX: &str = "/cohort/events/";

/// Identity of a namespaced object, and the unit of reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Full store key under `prefix`, e.g. `/cohort/roles/default/storage`.
    pub fn store_key(&self, prefix: &str) -> String {
        format!("{prefix}{}/{}", self.namespace, self.name)
    }

    /// Parses a store key of the form `{prefix}{namespace}/{name}`.
    ///
    /// Keys with extra path segments (such as event records) are rejected.
    pub fn from_store_key(prefix: &str, key: &str) -> Option<Self> {
        let rest = key.strip_prefix(prefix)?;
        let (namespace, name) = rest.split_once('/')?;
        if namespace.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

/// Prefix covering every object of one namespace under `prefix`.
pub fn namespace_prefix(prefix: &str, namespace: &str) -> String {
    format!("{prefix}{namespace}/")
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
