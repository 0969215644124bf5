use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cluster::Cluster;
use crate::meta::{ObjectMeta, CLUSTER_LABEL, ROLE_LABEL};

/// Object kind recorded in owner references pointing at a role.
pub const ROLE_KIND: &str = "Role";

/// Replica count used when neither the role nor its cluster declares one.
pub const DEFAULT_REPLICAS: u32 = 3;

/// Lifecycle code surfaced on the role's status subresource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Created,
    RollingUpgrade,
    Ready,
    Failed,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusCode::Created => "Created",
            StatusCode::RollingUpgrade => "RollingUpgrade",
            StatusCode::Ready => "Ready",
            StatusCode::Failed => "Failed",
        };
        f.write_str(s)
    }
}

/// Desired state of one role, owned by the end user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoleSpec {
    /// Role name within the cluster (e.g. "storage", "proxy").
    pub role: String,

    /// Name of the owning cluster in the same namespace.
    pub cluster: String,

    /// Desired replica count. `None` falls back to the cluster default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,

    /// Opaque template parameters; overrides the cluster defaults.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
}

/// Status subresource. Written only by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleStatus {
    /// Absent until the role is first created in the backing system.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<StatusCode>,

    /// Replica count requested when the role was created.
    #[serde(default)]
    pub replicas: u32,

    #[serde(default)]
    pub current_replicas: u32,

    #[serde(default)]
    pub ready_replicas: u32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,

    /// Internal spec generation whose create or upgrade this status has recorded.
    #[serde(default)]
    pub observed_generation: u64,

    /// Human-readable reason for the last failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A named, homogeneous group of replicated workers.
///
/// Stored under `/cohort/roles/{namespace}/{name}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Role {
    pub metadata: ObjectMeta,
    pub spec: RoleSpec,
    #[serde(default)]
    pub status: RoleStatus,
}

impl Role {
    /// Effective desired replica count after applying cluster defaults.
    pub fn desired_replicas(&self, cluster: &Cluster) -> u32 {
        self.spec
            .replicas
            .or(cluster.spec.default_replicas)
            .unwrap_or(DEFAULT_REPLICAS)
    }

    /// Label selector matching the role's workers.
    pub fn selector(&self) -> String {
        selector(&self.spec.cluster, &self.spec.role)
    }
}

/// Builds `cohort.io/cluster=<cluster>,cohort.io/role=<role>`.
pub fn selector(cluster: &str, role: &str) -> String {
    format!("{CLUSTER_LABEL}={cluster},{ROLE_LABEL}={role}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::ClusterSpec;

    fn role(replicas: Option<u32>) -> Role {
        Role {
            metadata: ObjectMeta::new("ns", "demo-storage"),
            spec: RoleSpec {
                role: "storage".to_string(),
                cluster: "demo".to_string(),
                replicas,
                parameters: Value::Null,
            },
            status: RoleStatus::default(),
        }
    }

    fn cluster(default_replicas: Option<u32>) -> Cluster {
        Cluster {
            metadata: ObjectMeta::new("ns", "demo"),
            spec: ClusterSpec {
                default_replicas,
                ..ClusterSpec::default()
            },
        }
    }

    #[test]
    fn desired_replicas_falls_back_to_cluster_then_default() {
        assert_eq!(role(Some(0)).desired_replicas(&cluster(Some(5))), 0);
        assert_eq!(role(None).desired_replicas(&cluster(Some(5))), 5);
        assert_eq!(role(None).desired_replicas(&cluster(None)), DEFAULT_REPLICAS);
    }

    #[test]
    fn selector_uses_cluster_and_role_names() {
        assert_eq!(
            role(None).selector(),
            "cohort.io/cluster=demo,cohort.io/role=storage"
        );
    }

    #[test]
    fn status_decodes_from_sparse_document() {
        let status: RoleStatus = serde_json::from_str(r#"{"status":"RollingUpgrade"}"#).unwrap();
        assert_eq!(status.status, Some(StatusCode::RollingUpgrade));
        assert_eq!(status.current_replicas, 0);
        assert!(status.selector.is_empty());
    }
}
