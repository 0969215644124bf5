use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

/// Operator counters, safe for concurrent access.
#[derive(Debug, Default)]
pub struct SharedMetrics {
    /// Reconciliation passes started.
    pub reconcile_total: AtomicU64,
    /// Passes that ended in an error.
    pub reconcile_errors: AtomicU64,
    pub creates_total: AtomicU64,
    pub upgrades_total: AtomicU64,
    pub scale_up_total: AtomicU64,
    pub scale_down_total: AtomicU64,
    pub status_syncs_total: AtomicU64,
    /// Writes rejected because the object changed since it was read.
    pub version_conflicts_total: AtomicU64,
    pub requeue_immediate_total: AtomicU64,
    pub requeue_backoff_total: AtomicU64,
}

impl SharedMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 10] = [
            ("reconcile_total", "Reconciliation passes started.", &self.reconcile_total),
            ("reconcile_errors", "Reconciliation passes that ended in an error.", &self.reconcile_errors),
            ("creates_total", "Internal specs created.", &self.creates_total),
            ("upgrades_total", "Rolling upgrades started.", &self.upgrades_total),
            ("scale_up_total", "Scale-up actions applied.", &self.scale_up_total),
            ("scale_down_total", "Scale-down actions applied.", &self.scale_down_total),
            ("status_syncs_total", "Role status syncs applied.", &self.status_syncs_total),
            ("version_conflicts_total", "Writes rejected by optimistic concurrency.", &self.version_conflicts_total),
            ("requeue_immediate_total", "Immediate requeues requested.", &self.requeue_immediate_total),
            ("requeue_backoff_total", "Backoff requeues requested.", &self.requeue_backoff_total),
        ];

        let mut body = String::new();
        for (name, help, value) in counters {
            body.push_str(&format!(
                "# HELP cohort_operator_{name} {help}\n\
                 # TYPE cohort_operator_{name} counter\n\
                 cohort_operator_{name} {}\n",
                value.load(Ordering::Relaxed)
            ));
        }
        body
    }
}

/// GET /metrics: Prometheus text exposition format.
pub async fn metrics_handler(State(metrics): State<Arc<SharedMetrics>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, metrics.render())
}

/// GET /healthz: liveness probe.
pub async fn healthz_handler() -> impl IntoResponse {
    (axum::http::StatusCode::OK, "ok")
}

pub fn router(metrics: Arc<SharedMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(metrics)
}

pub async fn serve(
    addr: SocketAddr,
    metrics: Arc<SharedMetrics>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "metrics endpoint listening");
    axum::serve(listener, router(metrics))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    Ok(())
}
