//! HTTP surface of the orchestrator.
//!
//! Thin handlers over [`ScanOrchestrator`]: extract, delegate, wrap in
//! JSON. All error mapping lives in [`crate::error::ApiError`].

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use shared_types::{
    AddReposRequest, AddReposResponse, AnalysisResult, CreateScanRequest, CreateScanResponse,
    ScanLookupResponse, ScanStatusResponse, ScanSummary, WorkerReport, WorkerReportAck,
};

use crate::error::ApiError;
use crate::store::Fingerprint;
use crate::validate;
use crate::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/scans", post(create_scan).get(list_scans))
        .route("/api/v1/scans/lookup", get(lookup_scan))
        .route("/api/v1/scans/{session_id}", get(scan_status))
        .route("/api/v1/scans/{session_id}/results", get(scan_results))
        .route("/api/v1/scans/{session_id}/repos", post(add_repos))
        .route("/api/v1/jobs/{job_id}/status", post(report_job_status))
        // Admin job management
        .route("/admin/jobs/{job_name}", delete(cancel_job))
        .route("/health", get(health))
        .with_state(state)
}

/// POST /api/v1/scans — create a new scan session
async fn create_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateScanRequest>,
) -> Result<Json<CreateScanResponse>, ApiError> {
    Ok(Json(state.scans.create_scan(request).await?))
}

/// GET /api/v1/scans — list sessions with result counts
async fn list_scans(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ScanSummary>>, ApiError> {
    Ok(Json(state.scans.list_scans().await?))
}

#[derive(Debug, Deserialize)]
struct LookupParams {
    query: String,
    rules_path: Option<String>,
    #[serde(default)]
    use_pro: bool,
}

/// GET /api/v1/scans/lookup — most recent session matching a fingerprint
async fn lookup_scan(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LookupParams>,
) -> Result<Json<ScanLookupResponse>, ApiError> {
    let rules_path = validate::validate_rules_path(params.rules_path.as_deref())?;
    let fingerprint = Fingerprint {
        query: params.query,
        rules_path,
        use_pro: params.use_pro,
    };
    match state.scans.find_scan(&fingerprint).await? {
        Some(session_id) => Ok(Json(ScanLookupResponse { session_id })),
        None => Err(ApiError::NotFound(format!(
            "no session matching query '{}'",
            fingerprint.query
        ))),
    }
}

/// GET /api/v1/scans/{session_id} — aggregate status
async fn scan_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<Json<ScanStatusResponse>, ApiError> {
    Ok(Json(state.scans.session_status(session_id).await?))
}

/// GET /api/v1/scans/{session_id}/results — full result rows
async fn scan_results(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
) -> Result<Json<Vec<AnalysisResult>>, ApiError> {
    Ok(Json(state.scans.session_results(session_id).await?))
}

/// POST /api/v1/scans/{session_id}/repos — admit repos, dispatch jobs
async fn add_repos(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<i64>,
    Json(request): Json<AddReposRequest>,
) -> Result<Json<AddReposResponse>, ApiError> {
    Ok(Json(state.scans.add_repos(session_id, request.repos).await?))
}

/// POST /api/v1/jobs/{job_id}/status — worker callback (at-least-once)
async fn report_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    Json(report): Json<WorkerReport>,
) -> Result<Json<WorkerReportAck>, ApiError> {
    Ok(Json(state.scans.report_status(job_id, report).await?))
}

/// DELETE /admin/jobs/{job_name} — cancel an in-flight job
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(job_name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.scans.cancel_job(&job_name).await?;
    Ok(Json(serde_json::json!({ "status": "deleted", "job_name": job_name })))
}

/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "healthy", "service": "dragnet-orchestrator" }))
}
