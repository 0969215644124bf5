use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::meta::ObjectMeta;

/// Shared defaults for every role of a cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterSpec {
    /// Replica count for roles that do not declare one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_replicas: Option<u32>,

    /// Cluster-wide template parameters.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,

    /// Per-role parameter defaults, keyed by role name. Layered over `parameters`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub roles: BTreeMap<String, Value>,
}

/// The owning aggregate of one or more roles.
///
/// Stored under `/cohort/clusters/{namespace}/{name}`. Read-only to the operator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
}
