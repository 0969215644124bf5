pub mod cluster;
pub mod error;
pub mod event;
pub mod internal;
pub mod key;
pub mod meta;
pub mod role;
pub mod workload;

pub use cluster::{Cluster, ClusterSpec};
pub use error::MergeError;
pub use event::{EventRecord, Severity};
pub use internal::InternalSpec;
pub use key::{
    namespace_prefix, ObjectKey, CLUSTERS_PREFIX, EVENTS_PREFIX, INTERNAL_PREFIX, ROLES_PREFIX,
    WORKLOADS_PREFIX,
};
pub use meta::{ObjectMeta, OwnerReference, CLUSTER_LABEL, ROLE_LABEL};
pub use role::{selector, Role, RoleSpec, RoleStatus, StatusCode, DEFAULT_REPLICAS, ROLE_KIND};
pub use workload::WorkloadStatus;

pub mod telemetry;
