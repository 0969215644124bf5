use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::ObjectKey;

/// Label carrying the owning cluster's name.
pub const CLUSTER_LABEL: &str = "cohort.io/cluster";
/// Label carrying the role name within the cluster.
pub const ROLE_LABEL: &str = "cohort.io/role";

/// Points at the object that owns (and garbage-collects) another object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

/// Identity and bookkeeping shared by every stored document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,

    /// Assigned by whoever created the object. Used in owner references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// True if `owner` names an object of `kind` called `name`. The uids are compared
    /// only when both sides carry one.
    pub fn is_owned_by(&self, kind: &str, name: &str, uid: Option<&str>) -> bool {
        self.owner.as_ref().is_some_and(|o| {
            o.kind == kind
                && o.name == name
                && match (o.uid.as_deref(), uid) {
                    (Some(ours), Some(theirs)) => ours == theirs,
                    _ => true,
                }
        })
    }
}
