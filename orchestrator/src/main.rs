use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use orchestrator::compute::{ComputeBackend, KubeBackend, KubeSettings};
use orchestrator::scan::ScanOrchestrator;
use orchestrator::store::ResultStore;
use orchestrator::{api, config, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchestrator=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    info!(port = config.api_port, "orchestrator starting");

    let store = ResultStore::connect(&config.database_url).await?;

    // The compute backend is an optional capability: without it the API
    // still serves session reads and worker callbacks, and repo intake
    // answers 503.
    let compute: Option<Arc<dyn ComputeBackend>> = match &config.kube_api_url {
        Some(api_url) => {
            let token = match &config.kube_token {
                Some(token) => Some(token.clone()),
                None => match std::fs::read_to_string(&config.kube_token_file) {
                    Ok(raw) => Some(raw.trim().to_string()),
                    Err(e) => {
                        warn!(
                            path = %config.kube_token_file,
                            error = %e,
                            "no kubernetes token available; requests will be anonymous"
                        );
                        None
                    }
                },
            };
            let backend = KubeBackend::new(KubeSettings {
                api_url: api_url.clone(),
                token,
                insecure_tls: config.kube_insecure_tls,
                namespace: config.kube_namespace.clone(),
                worker_image: config.worker_image.clone(),
                job_ttl: config.job_ttl,
                callback_base_url: config.callback_base_url.clone(),
                artifact_bucket: config.artifact_bucket.clone(),
                aws_region: config.aws_region.clone(),
            })?;
            Some(Arc::new(backend) as Arc<dyn ComputeBackend>)
        }
        None => {
            warn!("KUBE_API_URL not set; running without a compute backend");
            None
        }
    };

    let state = Arc::new(AppState {
        scans: ScanOrchestrator::new(store, compute, config.max_parallel_jobs),
    });

    let app = api::router(state).layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.api_host, config.api_port);
    info!("listening on {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
