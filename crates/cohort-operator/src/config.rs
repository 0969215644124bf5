use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;

use crate::args::Args;
use crate::queue::Backoff;

/// Where documents live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfig {
    Etcd { endpoints: Vec<String> },
    Memory,
}

/// Immutable operator settings, built once at startup and handed to constructors.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorConfig {
    pub store: StoreConfig,
    pub workers: usize,
    pub backoff: Backoff,
    pub resync_interval: Duration,
    /// `None` keeps events forever.
    pub event_ttl: Option<Duration>,
    pub metrics_addr: SocketAddr,
}

impl TryFrom<&Args> for OperatorConfig {
    type Error = anyhow::Error;

    fn try_from(args: &Args) -> anyhow::Result<Self> {
        let store = if args.memory_store {
            StoreConfig::Memory
        } else {
            if args.etcd_endpoints.is_empty() {
                anyhow::bail!("at least one etcd endpoint is required");
            }
            StoreConfig::Etcd {
                endpoints: args.etcd_endpoints.clone(),
            }
        };

        if args.backoff_base_ms == 0 || args.backoff_max_ms < args.backoff_base_ms {
            anyhow::bail!(
                "invalid backoff: base {}ms, max {}ms",
                args.backoff_base_ms,
                args.backoff_max_ms
            );
        }

        let metrics_addr = args
            .metrics_addr
            .parse()
            .with_context(|| format!("invalid metrics address {:?}", args.metrics_addr))?;

        Ok(Self {
            store,
            workers: args.workers.max(1),
            backoff: Backoff {
                base: Duration::from_millis(args.backoff_base_ms),
                max: Duration::from_millis(args.backoff_max_ms),
            },
            resync_interval: Duration::from_secs(args.resync_secs.max(1)),
            event_ttl: (args.event_ttl_secs > 0).then(|| Duration::from_secs(args.event_ttl_secs)),
            metrics_addr,
        })
    }
}
