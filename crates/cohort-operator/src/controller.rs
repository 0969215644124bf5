//! Wires the store, queue, watchers, workers and metrics endpoint together.

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use cohort_common::ObjectKey;
use cohort_meta::MetaStore;

use crate::client::ObjectClient;
use crate::config::OperatorConfig;
use crate::driver::Reconciler;
use crate::metrics::{self, SharedMetrics};
use crate::queue::WorkQueue;
use crate::recorder::{EventRecorder, StoreRecorder};
use crate::watch::{resync_loop, Source, Watcher};

pub struct Controller {
    config: OperatorConfig,
    client: ObjectClient,
    queue: Arc<WorkQueue>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<SharedMetrics>,
}

impl Controller {
    pub fn new(config: OperatorConfig, store: Arc<dyn MetaStore>) -> Self {
        let client = ObjectClient::new(store.clone());
        let metrics = Arc::new(SharedMetrics::default());
        let recorder: Arc<dyn EventRecorder> = Arc::new(StoreRecorder::new(store, config.event_ttl));
        let reconciler = Arc::new(Reconciler::new(client.clone(), recorder, metrics.clone()));
        let queue = Arc::new(WorkQueue::new(config.backoff));
        Self {
            config,
            client,
            queue,
            reconciler,
            metrics,
        }
    }

    /// Runs until `shutdown` fires, then waits for in-flight passes to finish.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(
            workers = self.config.workers,
            resync_secs = self.config.resync_interval.as_secs(),
            "controller starting"
        );

        let mut tasks = JoinSet::new();

        let watcher = Arc::new(Watcher::new(self.client.clone(), self.queue.clone()));
        for source in Source::ALL {
            let watcher = watcher.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                watcher.run(source, shutdown).await;
                Ok(())
            });
        }

        {
            let (client, queue) = (self.client.clone(), self.queue.clone());
            let (every, shutdown) = (self.config.resync_interval, shutdown.clone());
            tasks.spawn(async move {
                resync_loop(client, queue, every, shutdown).await;
                Ok(())
            });
        }

        {
            let (addr, metrics, shutdown) =
                (self.config.metrics_addr, self.metrics.clone(), shutdown.clone());
            tasks.spawn(async move {
                let served = metrics::serve(addr, metrics, shutdown.clone()).await;
                if served.is_err() {
                    // A dead metrics endpoint stops the operator.
                    shutdown.cancel();
                }
                served
            });
        }

        let reconciler = self.reconciler.clone();
        let handler = move |key: ObjectKey| {
            let reconciler = reconciler.clone();
            async move { reconciler.reconcile(&key).await }
        };
        self.queue
            .run_workers(self.config.workers, shutdown.clone(), handler)
            .await;

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(error=%e, "controller task failed");
                    result = Err(e);
                }
                Err(e) => tracing::error!(error=%e, "controller task panicked"),
            }
        }
        tracing::info!("controller stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use cohort_common::StatusCode;
    use cohort_meta::MemoryMetaStore;

    use super::*;
    use crate::config::StoreConfig;
    use crate::queue::Backoff;
    use crate::testkit::{cluster, role, seed_cluster, seed_role};

    fn config() -> OperatorConfig {
        OperatorConfig {
            store: StoreConfig::Memory,
            workers: 2,
            backoff: Backoff {
                base: Duration::from_millis(10),
                max: Duration::from_millis(100),
            },
            resync_interval: Duration::from_millis(50),
            event_ttl: None,
            metrics_addr: "127.0.0.1:0".parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn reconciles_roles_until_shutdown() {
        let store = Arc::new(MemoryMetaStore::new());
        let client = ObjectClient::new(store.clone());
        let controller = Controller::new(config(), store);
        let shutdown = CancellationToken::new();
        let running = tokio::spawn(controller.run(shutdown.clone()));

        seed_cluster(&client, &cluster(json!({"image": "worker:1.0"}))).await;
        let role = role(Some(2), json!({}));
        seed_role(&client, &role).await;

        let key = role.metadata.key();
        let mut created = None;
        for _ in 0..100 {
            if let Some(spec) = client.get_internal_spec(&key).await.unwrap() {
                created = Some(spec.object);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(created.map(|s| s.replicas), Some(2));

        let mut status = None;
        for _ in 0..100 {
            status = client.get_role(&key).await.unwrap().and_then(|r| r.object.status.status);
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status, Some(StatusCode::Created));

        shutdown.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(5), running).await;
        assert!(stopped.unwrap().unwrap().is_ok());
    }
}
