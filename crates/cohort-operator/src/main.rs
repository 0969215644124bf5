use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use cohort_meta::{EtcdMetaStore, MemoryMetaStore, MetaStore};
use cohort_operator::args::Args;
use cohort_operator::config::{OperatorConfig, StoreConfig};
use cohort_operator::controller::Controller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let otel = cohort_common::telemetry::init_tracing(
        "cohort-operator",
        args.otlp_endpoint.as_deref(),
        args.otlp_token.as_deref(),
    );

    let config = OperatorConfig::try_from(&args)?;

    let store: Arc<dyn MetaStore> = match &config.store {
        StoreConfig::Etcd { endpoints } => {
            let store = EtcdMetaStore::connect(endpoints).await?;
            tracing::info!(?endpoints, "connected to etcd");
            Arc::new(store)
        }
        StoreConfig::Memory => {
            tracing::warn!("using in-memory store, state is lost on exit");
            Arc::new(MemoryMetaStore::new())
        }
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    shutdown.cancel();
                }
                Err(e) => tracing::error!(error=%e, "failed to listen for ctrl-c"),
            }
        });
    }

    let result = Controller::new(config, store).run(shutdown).await;

    if let Some(provider) = otel {
        if let Err(e) = provider.shutdown() {
            eprintln!("failed to flush traces: {e}");
        }
    }
    result
}
