use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::key::ObjectKey;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
}

/// A human-readable notification about a role.
///
/// Stored under `/cohort/events/{namespace}/{name}/{id}` with a TTL lease.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub id: String,
    pub subject: ObjectKey,
    pub severity: Severity,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    pub fn new(subject: &ObjectKey, severity: Severity, reason: &str, message: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            subject: subject.clone(),
            severity,
            reason: reason.to_string(),
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn store_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}{}/{}/{}",
            self.subject.namespace, self.subject.name, self.id
        )
    }
}
