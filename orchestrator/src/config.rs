use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the API binds to
    pub api_host: String,
    /// Port the API listens on
    pub api_port: u16,
    /// Database URL: `postgres://...` for PostgreSQL, anything else is a
    /// SQLite path (with or without the `sqlite:` prefix)
    pub database_url: String,
    /// Per-session ceiling on concurrently in-flight compute jobs
    pub max_parallel_jobs: u32,
    /// Kubernetes API server base URL; when unset the service runs without
    /// a compute backend and rejects repo intake with 503
    pub kube_api_url: Option<String>,
    /// Bearer token for the Kubernetes API (inline value wins over the file)
    pub kube_token: Option<String>,
    /// Path to a token file (defaults to the in-cluster service-account path)
    pub kube_token_file: String,
    /// Skip TLS verification against the Kubernetes API (self-signed dev clusters)
    pub kube_insecure_tls: bool,
    /// Namespace jobs are created in
    pub kube_namespace: String,
    /// Worker container image
    pub worker_image: String,
    /// How long the backend keeps finished jobs before garbage-collecting them
    pub job_ttl: Duration,
    /// Base URL workers use to reach this API for status callbacks
    pub callback_base_url: String,
    /// Artifact bucket passed through to workers (empty = no artifact upload)
    pub artifact_bucket: Option<String>,
    pub aws_region: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_host = env_str("API_HOST", "0.0.0.0");
        let api_port = env_parse("API_PORT", 8000)?;

        Ok(Self {
            api_host: api_host.clone(),
            api_port,
            database_url: env_str("DATABASE_URL", "sqlite:./data/dragnet.db"),
            max_parallel_jobs: env_parse("MAX_PARALLEL_JOBS", 10)?,
            kube_api_url: std::env::var("KUBE_API_URL").ok(),
            kube_token: std::env::var("KUBE_TOKEN").ok(),
            kube_token_file: env_str(
                "KUBE_TOKEN_FILE",
                "/var/run/secrets/kubernetes.io/serviceaccount/token",
            ),
            kube_insecure_tls: env_parse("KUBE_INSECURE_TLS", false)?,
            kube_namespace: env_str("KUBE_NAMESPACE", "default"),
            worker_image: env_str("WORKER_IMAGE", "dragnet-worker:latest"),
            job_ttl: Duration::from_secs(env_parse("JOB_TTL_SECONDS", 3600)?),
            callback_base_url: env_str(
                "CALLBACK_BASE_URL",
                &format!("http://{api_host}:{api_port}"),
            ),
            artifact_bucket: std::env::var("ARTIFACT_BUCKET").ok().filter(|s| !s.is_empty()),
            aws_region: env_str("AWS_REGION", "us-east-1"),
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}
