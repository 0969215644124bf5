use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use tokio::sync::{broadcast, RwLock};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};

use crate::types::{
    CasOutcome, MetaStore, PrefixSnapshot, Versioned, WatchEvent, WatchStream, ABSENT,
};

/// In-process store with etcd-like revision semantics. Used for local runs and tests.
#[derive(Debug, Clone)]
pub struct MemoryMetaStore {
    inner: Arc<RwLock<Inner>>,
    tx: broadcast::Sender<WatchEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    revision: u64,
    kv: BTreeMap<String, Versioned>,
}

impl Inner {
    fn current(&self, key: &str) -> u64 {
        self.kv.get(key).map(|v| v.revision).unwrap_or(ABSENT)
    }

    fn write(&mut self, key: &str, value: Vec<u8>) -> WatchEvent {
        self.revision = self.revision.saturating_add(1);
        let revision = self.revision;
        self.kv.insert(
            key.to_string(),
            Versioned {
                value: value.clone(),
                revision,
            },
        );
        WatchEvent {
            key: key.to_string(),
            value: Some(value),
            revision,
        }
    }

    fn remove(&mut self, key: &str) -> Option<WatchEvent> {
        self.kv.remove(key)?;
        self.revision = self.revision.saturating_add(1);
        Some(WatchEvent {
            key: key.to_string(),
            value: None,
            revision: self.revision,
        })
    }
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            tx,
        }
    }

    fn emit(&self, event: WatchEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for MemoryMetaStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let inner = self.inner.read().await;
        Ok(inner.kv.get(key).cloned())
    }

    async fn snapshot_prefix(&self, prefix: &str) -> Result<PrefixSnapshot> {
        let inner = self.inner.read().await;
        let items = inner
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(PrefixSnapshot {
            revision: inner.revision,
            items,
        })
    }

    async fn put(&self, key: &str, value: Vec<u8>, _ttl_ms: Option<u64>) -> Result<u64> {
        let event = self.inner.write().await.write(key, value);
        let revision = event.revision;
        self.emit(event);
        Ok(revision)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        let event = {
            let mut inner = self.inner.write().await;
            let current = inner.current(key);
            if current != expected_revision {
                return Ok(CasOutcome::Conflict { current });
            }
            inner.write(key, value)
        };
        let revision = event.revision;
        self.emit(event);
        Ok(CasOutcome::Applied(revision))
    }

    async fn compare_and_delete(&self, key: &str, expected_revision: u64) -> Result<CasOutcome> {
        let event = {
            let mut inner = self.inner.write().await;
            let current = inner.current(key);
            if current == ABSENT || current != expected_revision {
                return Ok(CasOutcome::Conflict { current });
            }
            inner.remove(key)
        };
        let Some(event) = event else {
            return Ok(CasOutcome::Conflict { current: ABSENT });
        };
        let revision = event.revision;
        self.emit(event);
        Ok(CasOutcome::Applied(revision))
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        let prefix = prefix.to_string();
        let min_rev = start_revision_exclusive.unwrap_or(0);
        let rx = self.tx.subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |msg| match msg {
            Ok(ev) if ev.revision > min_rev && ev.key.starts_with(&prefix) => Some(ev),
            _ => None,
        });

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_only_succeeds_once() {
        let store = MemoryMetaStore::new();
        let first = store.create("/a", b"1".to_vec()).await.unwrap();
        assert_eq!(first, CasOutcome::Applied(1));

        let second = store.create("/a", b"2".to_vec()).await.unwrap();
        assert_eq!(second, CasOutcome::Conflict { current: 1 });
        assert_eq!(store.get("/a").await.unwrap().unwrap().value, b"1".to_vec());
    }

    #[tokio::test]
    async fn compare_and_swap_checks_the_key_revision() {
        let store = MemoryMetaStore::new();
        let rev = store.put("/a", b"1".to_vec(), None).await.unwrap();
        store.put("/b", b"x".to_vec(), None).await.unwrap();

        let stale = store.compare_and_swap("/a", rev + 1, b"2".to_vec()).await.unwrap();
        assert_eq!(stale, CasOutcome::Conflict { current: rev });

        let ok = store.compare_and_swap("/a", rev, b"2".to_vec()).await.unwrap();
        assert!(matches!(ok, CasOutcome::Applied(next) if next > rev));

        let missing = store.compare_and_swap("/missing", 7, b"2".to_vec()).await.unwrap();
        assert_eq!(missing, CasOutcome::Conflict { current: ABSENT });
    }

    #[tokio::test]
    async fn compare_and_delete_requires_matching_revision() {
        let store = MemoryMetaStore::new();
        let rev = store.put("/a", b"1".to_vec(), None).await.unwrap();

        assert_eq!(
            store.compare_and_delete("/a", rev + 5).await.unwrap(),
            CasOutcome::Conflict { current: rev }
        );
        assert!(matches!(
            store.compare_and_delete("/a", rev).await.unwrap(),
            CasOutcome::Applied(_)
        ));
        assert!(store.get("/a").await.unwrap().is_none());
        assert_eq!(
            store.compare_and_delete("/a", rev).await.unwrap(),
            CasOutcome::Conflict { current: ABSENT }
        );
    }

    #[tokio::test]
    async fn list_prefix_stays_within_prefix() {
        let store = MemoryMetaStore::new();
        store.put("/r/ns/a", b"1".to_vec(), None).await.unwrap();
        store.put("/r/ns/b", b"2".to_vec(), None).await.unwrap();
        store.put("/s/ns/c", b"3".to_vec(), None).await.unwrap();

        let keys: Vec<String> = store
            .list_prefix("/r/")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["/r/ns/a".to_string(), "/r/ns/b".to_string()]);
    }

    #[tokio::test]
    async fn snapshot_of_an_empty_prefix_still_carries_the_store_revision() {
        let store = MemoryMetaStore::new();
        store.put("/r/a", b"1".to_vec(), None).await.unwrap();
        let rev = store.put("/s/b", b"2".to_vec(), None).await.unwrap();

        let empty = store.snapshot_prefix("/t/").await.unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.revision, rev);

        let listed = store.snapshot_prefix("/r/").await.unwrap();
        assert_eq!(listed.items.len(), 1);
        assert_eq!(listed.revision, rev);
    }

    #[tokio::test]
    async fn watch_filters_by_prefix_and_revision() {
        let store = MemoryMetaStore::new();
        let start = store.put("/r/old", b"0".to_vec(), None).await.unwrap();
        let mut stream = store.watch_prefix("/r/", Some(start)).await.unwrap();

        store.put("/s/other", b"1".to_vec(), None).await.unwrap();
        let rev = store.put("/r/new", b"2".to_vec(), None).await.unwrap();

        let ev = stream.next().await.unwrap();
        assert_eq!(ev.key, "/r/new");
        assert_eq!(ev.revision, rev);
        assert_eq!(ev.value, Some(b"2".to_vec()));
    }
}
