use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cluster::Cluster;
use crate::error::MergeError;
use crate::meta::{ObjectMeta, OwnerReference, CLUSTER_LABEL, ROLE_LABEL};
use crate::role::{Role, StatusCode, ROLE_KIND};

/// The merged specification handed to the rendering subsystem.
///
/// One per role, stored under `/cohort/internal/{namespace}/{name}` with the role's
/// own name and namespace. Always replaced wholesale, never patched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InternalSpec {
    pub metadata: ObjectMeta,

    pub cluster: String,

    pub role: String,

    /// The replica count the operator last asked for.
    pub replicas: u32,

    /// Fully merged template parameters. Keys are sorted and no leaf is `null`.
    #[serde(default)]
    pub parameters: Map<String, Value>,

    /// Bumped by every create and template upgrade; scaling keeps it.
    #[serde(default)]
    pub generation: u64,

    /// Status the last create or upgrade moved the role to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollout: Option<StatusCode>,
}

impl InternalSpec {
    /// Merges cluster defaults with the role's own values (role wins).
    ///
    /// Layers, lowest precedence first: cluster parameters, the cluster's defaults for
    /// this role name, the role's parameters.
    pub fn merge(cluster: &Cluster, role: &Role) -> Result<Self, MergeError> {
        let mut parameters = Map::new();
        overlay(&mut parameters, &cluster.spec.parameters, "cluster")?;
        if let Some(defaults) = cluster.spec.roles.get(&role.spec.role) {
            overlay(&mut parameters, defaults, "cluster role default")?;
        }
        overlay(&mut parameters, &role.spec.parameters, "role")?;

        let mut metadata = ObjectMeta::new(
            role.metadata.namespace.clone(),
            role.metadata.name.clone(),
        );
        metadata
            .labels
            .insert(CLUSTER_LABEL.to_string(), role.spec.cluster.clone());
        metadata
            .labels
            .insert(ROLE_LABEL.to_string(), role.spec.role.clone());
        metadata.owner = Some(OwnerReference {
            kind: ROLE_KIND.to_string(),
            name: role.metadata.name.clone(),
            uid: role.metadata.uid.clone(),
        });

        Ok(Self {
            metadata,
            cluster: role.spec.cluster.clone(),
            role: role.spec.role.clone(),
            replicas: role.desired_replicas(cluster),
            parameters,
            generation: 0,
            rollout: None,
        })
    }

    /// Compares template fields only; the replica count, rollout bookkeeping and metadata
    /// are excluded.
    pub fn same_template(&self, other: &InternalSpec) -> bool {
        self.cluster == other.cluster
            && self.role == other.role
            && self.parameters == other.parameters
    }

    pub fn with_replicas(mut self, replicas: u32) -> Self {
        self.replicas = replicas;
        self
    }

    /// Stamps the spec as the rollout that follows `previous` (0 when nothing existed).
    pub fn rolled_out(mut self, previous: u64, code: StatusCode) -> Self {
        self.generation = previous.saturating_add(1);
        self.rollout = Some(code);
        self
    }
}

fn overlay(
    target: &mut Map<String, Value>,
    layer: &Value,
    origin: &'static str,
) -> Result<(), MergeError> {
    match layer {
        Value::Null => Ok(()),
        Value::Object(map) => {
            merge_into(target, map);
            Ok(())
        }
        other => Err(MergeError::NotAnObject {
            origin,
            found: kind_of(other),
        }),
    }
}

// `null` means "not set" and leaves the lower layer in place.
fn merge_into(target: &mut Map<String, Value>, layer: &Map<String, Value>) {
    for (key, value) in layer {
        match value {
            Value::Null => {}
            Value::Object(child) => match target.get_mut(key) {
                Some(Value::Object(existing)) => merge_into(existing, child),
                _ => {
                    let mut fresh = Map::new();
                    merge_into(&mut fresh, child);
                    target.insert(key.clone(), Value::Object(fresh));
                }
            },
            other => {
                target.insert(key.clone(), other.clone());
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cluster::ClusterSpec;
    use crate::role::{RoleSpec, RoleStatus};

    fn cluster(parameters: Value) -> Cluster {
        Cluster {
            metadata: ObjectMeta::new("ns", "demo"),
            spec: ClusterSpec {
                default_replicas: Some(2),
                parameters,
                ..ClusterSpec::default()
            },
        }
    }

    fn role(replicas: Option<u32>, parameters: Value) -> Role {
        let mut metadata = ObjectMeta::new("ns", "demo-storage");
        metadata.uid = Some("uid-1".to_string());
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

    #[test]
    fn role_values_override_cluster_defaults() {
        let cluster = cluster(json!({"image": "worker:1.0", "jvm": {"heap": "1g", "gc": "g1"}}));
        let role = role(Some(4), json!({"jvm": {"heap": "4g"}, "ports": [7000]}));

        let spec = InternalSpec::merge(&cluster, &role).unwrap();

        assert_eq!(spec.replicas, 4);
        assert_eq!(
            Value::Object(spec.parameters),
            json!({"image": "worker:1.0", "jvm": {"heap": "4g", "gc": "g1"}, "ports": [7000]})
        );
    }

    #[test]
    fn per_role_cluster_defaults_sit_between_cluster_and_role() {
        let mut cluster = cluster(json!({"image": "worker:1.0", "log": "info"}));
        cluster
            .spec
            .roles
            .insert("storage".to_string(), json!({"image": "storage:2.0", "log": "debug"}));
        cluster
            .spec
            .roles
            .insert("proxy".to_string(), json!({"image": "proxy:9.9"}));
        let role = role(None, json!({"log": "warn"}));

        let spec = InternalSpec::merge(&cluster, &role).unwrap();

        assert_eq!(spec.replicas, 2);
        assert_eq!(
            Value::Object(spec.parameters),
            json!({"image": "storage:2.0", "log": "warn"})
        );
    }

    #[test]
    fn null_override_keeps_the_default_and_is_not_materialized() {
        let cluster = cluster(json!({"image": "worker:1.0", "extra": {"a": null}}));
        let role = role(Some(1), json!({"image": null}));

        let spec = InternalSpec::merge(&cluster, &role).unwrap();

        assert_eq!(
            Value::Object(spec.parameters),
            json!({"image": "worker:1.0", "extra": {}})
        );
    }

    #[test]
    fn identity_labels_and_owner_follow_the_role() {
        let spec = InternalSpec::merge(&cluster(Value::Null), &role(Some(1), Value::Null)).unwrap();

        assert_eq!(spec.metadata.name, "demo-storage");
        assert_eq!(spec.metadata.namespace, "ns");
        assert_eq!(spec.metadata.labels.get(CLUSTER_LABEL).map(String::as_str), Some("demo"));
        assert_eq!(spec.metadata.labels.get(ROLE_LABEL).map(String::as_str), Some("storage"));
        assert!(spec.metadata.is_owned_by(ROLE_KIND, "demo-storage", Some("uid-1")));
        assert!(!spec.metadata.is_owned_by(ROLE_KIND, "demo-storage", Some("uid-2")));
        assert_eq!(
            spec.metadata.owner.and_then(|o| o.uid).as_deref(),
            Some("uid-1")
        );
    }

    #[test]
    fn non_object_parameters_are_malformed() {
        let err = InternalSpec::merge(&cluster(Value::Null), &role(Some(1), json!(["x"]))).unwrap_err();
        assert_eq!(
            err,
            MergeError::NotAnObject {
                origin: "role",
                found: "an array"
            }
        );

        let err = InternalSpec::merge(&cluster(json!("oops")), &role(Some(1), Value::Null)).unwrap_err();
        assert!(err.to_string().starts_with("cluster parameters"));
    }

    #[test]
    fn replica_count_is_not_part_of_the_template() {
        let cluster = cluster(json!({"image": "worker:1.0"}));
        let three = InternalSpec::merge(&cluster, &role(Some(3), Value::Null)).unwrap();
        let five = InternalSpec::merge(&cluster, &role(Some(5), Value::Null)).unwrap();
        assert!(three.same_template(&five));
        assert_ne!(three, five);

        let upgraded =
            InternalSpec::merge(&cluster, &role(Some(3), json!({"image": "worker:1.1"}))).unwrap();
        assert!(!three.same_template(&upgraded));
    }

    #[test]
    fn equality_ignores_document_key_order() {
        let a: InternalSpec = serde_json::from_str(
            r#"{"metadata":{"name":"r","namespace":"n"},"cluster":"c","role":"r","replicas":1,
                "parameters":{"b":1,"a":{"y":2,"x":1}}}"#,
        )
        .unwrap();
        let b: InternalSpec = serde_json::from_str(
            r#"{"replicas":1,"parameters":{"a":{"x":1,"y":2},"b":1},"role":"r","cluster":"c",
                "metadata":{"namespace":"n","name":"r"}}"#,
        )
        .unwrap();
        assert!(a.same_template(&b));
        assert_eq!(a, b);
    }
}
