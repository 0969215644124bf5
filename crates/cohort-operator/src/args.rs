use clap::Parser;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// etcd endpoints, comma separated.
    #[arg(
        long = "etcd-endpoint",
        env = "COHORT_ETCD_ENDPOINTS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:2379"
    )]
    pub etcd_endpoints: Vec<String>,

    /// Keep all state in process memory instead of etcd (local runs only).
    #[arg(long, env = "COHORT_MEMORY_STORE")]
    pub memory_store: bool,

    /// Roles reconciled concurrently.
    #[arg(long, env = "COHORT_WORKERS", default_value_t = 4)]
    pub workers: usize,

    #[arg(long, env = "COHORT_BACKOFF_BASE_MS", default_value_t = 500)]
    pub backoff_base_ms: u64,

    #[arg(long, env = "COHORT_BACKOFF_MAX_MS", default_value_t = 60_000)]
    pub backoff_max_ms: u64,

    /// Every role is re-enqueued at this interval.
    #[arg(long, env = "COHORT_RESYNC_SECS", default_value_t = 300)]
    pub resync_secs: u64,

    /// Lifetime of persisted events; 0 keeps them forever.
    #[arg(long, env = "COHORT_EVENT_TTL_SECS", default_value_t = 3600)]
    pub event_ttl_secs: u64,

    #[arg(long, env = "COHORT_METRICS_ADDR", default_value = "0.0.0.0:9464")]
    pub metrics_addr: String,

    /// OTLP endpoint for exporting traces (e.g. "http://collector:4318/v1/traces").
    #[arg(long, env = "COHORT_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Bearer token for the OTLP endpoint.
    #[arg(long, env = "COHORT_OTLP_TOKEN")]
    pub otlp_token: Option<String>,
}
