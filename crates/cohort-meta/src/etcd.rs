use std::sync::Arc;

use anyhow::Result;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, PutOptions, Txn, TxnOp, WatchOptions,
};
use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::types::{
    CasOutcome, MetaStore, PrefixSnapshot, Versioned, WatchEvent, WatchStream, ABSENT,
};

#[derive(Clone)]
pub struct EtcdMetaStore {
    client: Arc<Mutex<Client>>,
}

impl EtcdMetaStore {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let c = Client::connect(endpoints, None).await?;
        Ok(Self {
            client: Arc::new(Mutex::new(c)),
        })
    }

    fn ttl_to_seconds(ttl_ms: u64) -> i64 {
        let secs = ttl_ms.div_ceil(1000) as i64;
        secs.max(1)
    }

    async fn current_revision(cli: &mut Client, key: &str) -> Result<u64> {
        let resp = cli.get(key, None).await?;
        Ok(resp
            .kvs()
            .first()
            .map(|kv| kv.mod_revision() as u64)
            .unwrap_or(ABSENT))
    }

    async fn conditional(&self, key: &str, expected_revision: u64, op: TxnOp) -> Result<CasOutcome> {
        let mut cli = self.client.lock().await;

        // mod_revision of a missing key compares as 0, which is ABSENT.
        let cmp = Compare::mod_revision(key, CompareOp::Equal, expected_revision as i64);
        let txn = Txn::new().when([cmp]).and_then([op]).or_else([]);
        let resp = cli.txn(txn).await?;

        if resp.succeeded() {
            let rev = resp.header().map(|h| h.revision()).unwrap_or_default();
            return Ok(CasOutcome::Applied(rev as u64));
        }

        let current = Self::current_revision(&mut cli, key).await?;
        Ok(CasOutcome::Conflict { current })
    }
}

#[async_trait::async_trait]
impl MetaStore for EtcdMetaStore {
    async fn get(&self, key: &str) -> Result<Option<Versioned>> {
        let mut cli = self.client.lock().await;
        let resp = cli.get(key, None).await?;
        Ok(resp.kvs().first().map(|kv| Versioned {
            value: kv.value().to_vec(),
            revision: kv.mod_revision() as u64,
        }))
    }

    async fn snapshot_prefix(&self, prefix: &str) -> Result<PrefixSnapshot> {
        let mut cli = self.client.lock().await;
        let opts = GetOptions::new().with_prefix();
        let resp = cli.get(prefix, Some(opts)).await?;

        let items = resp
            .kvs()
            .iter()
            .map(|kv| {
                (
                    String::from_utf8_lossy(kv.key()).to_string(),
                    Versioned {
                        value: kv.value().to_vec(),
                        revision: kv.mod_revision() as u64,
                    },
                )
            })
            .collect();
        Ok(PrefixSnapshot {
            revision: resp.header().map(|h| h.revision()).unwrap_or_default() as u64,
            items,
        })
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl_ms: Option<u64>) -> Result<u64> {
        let mut cli = self.client.lock().await;

        let mut opts = PutOptions::new();
        if let Some(ttl_ms) = ttl_ms {
            let lease = cli.lease_grant(Self::ttl_to_seconds(ttl_ms), None).await?;
            opts = opts.with_lease(lease.id());
        }

        let resp = cli.put(key, value, Some(opts)).await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok(rev as u64)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_revision: u64,
        value: Vec<u8>,
    ) -> Result<CasOutcome> {
        self.conditional(key, expected_revision, TxnOp::put(key, value, None))
            .await
    }

    async fn compare_and_delete(&self, key: &str, expected_revision: u64) -> Result<CasOutcome> {
        if expected_revision == ABSENT {
            let mut cli = self.client.lock().await;
            let current = Self::current_revision(&mut cli, key).await?;
            return Ok(CasOutcome::Conflict { current });
        }
        self.conditional(key, expected_revision, TxnOp::delete(key, None))
            .await
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_revision_exclusive: Option<u64>,
    ) -> Result<WatchStream> {
        let mut cli = self.client.lock().await;

        let mut opts = WatchOptions::new().with_prefix();
        if let Some(min_rev) = start_revision_exclusive {
            // etcd's start_revision is inclusive.
            opts = opts.with_start_revision(min_rev.saturating_add(1) as i64);
        }

        let (watcher, mut stream) = cli.watch(prefix, Some(opts)).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<WatchEvent>(1024);
        tokio::spawn(async move {
            // Dropping the watcher cancels the server-side watch.
            let _watcher = watcher;
            while let Some(item) = stream.message().await.transpose() {
                let Ok(resp) = item else { return };
                // Cancelled (e.g. start revision compacted): end the stream so the
                // caller lists again.
                if resp.canceled() {
                    return;
                }

                for ev in resp.events() {
                    let Some(kv) = ev.kv() else { continue };
                    let value = match ev.event_type() {
                        EventType::Put => Some(kv.value().to_vec()),
                        EventType::Delete => None,
                    };
                    let event = WatchEvent {
                        key: String::from_utf8_lossy(kv.key()).to_string(),
                        value,
                        revision: kv.mod_revision() as u64,
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
