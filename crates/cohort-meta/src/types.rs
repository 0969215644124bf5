use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};

/// Revision a key reports when it does not exist.
pub const ABSENT: u64 = 0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchEvent {
    pub key: String,
    /// `None` for deletions.
    pub value: Option<Vec<u8>>,
    pub revision: u64,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// A value together with the revision it was last modified at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
    pub value: Vec<u8>,
    pub revision: u64,
}

/// Keys under a prefix as seen at one store revision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixSnapshot {
    /// Store-wide revision the listing reflects, even when no key matched.
    pub revision: u64,
    pub items: Vec<(String, Versioned)>,
}

/// Result of a conditional write or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The condition held; carries the new revision.
    Applied(u64),
    /// The key was at `current` instead (`ABSENT` if it does not exist).
    Conflict { current: u64 },
}

/// Versioned key/value store backing every document the operator reads or writes.
///
/// Revisions are per-key modification revisions and double as optimistic-concurrency
/// versions: conditional operations only apply when the key is still at the expected
/// revision.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Versioned>>;

    /// Lists `prefix` together with the store revision of the read. Watching from that
    /// revision misses no later change.
    async fn snapshot_prefix(&self, prefix: &str) -> Result<PrefixSnapshot>;

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<(String, Versioned)>> {
        Ok(self.snapshot_prefix(prefix).await?.items)
    }

    /// Unconditional write. `ttl_ms` attaches a lease where the backend supports one.
    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64>;

    /// Writes only if the key does not exist yet.
    async fn create(&self, key: &str, value: Vec<u8>) -> Result<CasOutcome> {
        self.compare_and_swap(key, ABSENT, value).await
    }

    /// Writes only if the key is at `expected_revision` (`ABSENT` = must not exist).
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome>;

    /// Deletes only if the key is at `expected_revision`.
    async fn compare_and_delete(&self, key: &str, expected_revision: u64) -> Result<CasOutcome>;

    /// Changes under `prefix` with a revision strictly greater than `start_revision_exclusive`.
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream>;
}
