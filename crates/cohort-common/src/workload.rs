use serde::{Deserialize, Serialize};

/// Replica counts reported by the child workload resource.
///
/// Written by the provisioning subsystem under `/cohort/workloads/{namespace}/{name}`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkloadStatus {
    /// Total replicas, including ones still on an old template.
    #[serde(default)]
    pub replicas: u32,

    /// Replicas running the current template.
    #[serde(default)]
    pub current_replicas: u32,

    #[serde(default)]
    pub ready_replicas: u32,
}
