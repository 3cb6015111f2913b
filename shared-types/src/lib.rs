//! Shared wire types between the orchestrator service and the dragnet CLI
//!
//! Everything here crosses an HTTP boundary, so every type is a plain serde
//! struct. Field names are the wire format — renaming a field is a breaking
//! API change for workers already running in the cluster.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Repositories
// ============================================================================

/// A candidate repository, as produced by the code-search side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepoRef {
    /// `owner/repo`
    pub name: String,
    /// Clone URL, e.g. `https://github.com/owner/repo`
    pub url: String,
}

// ============================================================================
// Scan sessions
// ============================================================================

/// Request to create a new scan session.
///
/// `(query, rules_path, use_pro)` is the session fingerprint: two requests
/// with the same tuple are the same logical analysis and may be resumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScanRequest {
    pub query: String,
    #[serde(default)]
    pub rules_path: Option<String>,
    #[serde(default)]
    pub use_pro: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateScanResponse {
    pub session_id: i64,
    pub query: String,
    pub status: String,
}

/// Resume lookup response: the most recent session matching a fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanLookupResponse {
    pub session_id: i64,
}

/// One row of the session listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSummary {
    pub session_id: i64,
    pub query: String,
    pub rules_path: Option<String>,
    pub use_pro: bool,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub result_count: i64,
    pub success_count: i64,
}

// ============================================================================
// Repo intake
// ============================================================================

/// Request to add repositories to a scan session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReposRequest {
    pub repos: Vec<RepoRef>,
}

/// One job created by an add-repos call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatedJobRef {
    pub repo_name: String,
    pub job_name: String,
    pub job_id: String,
}

/// Structured response covering both admitted and queued repos.
///
/// Admission denial is not an error: rejected repos come back in
/// `queued_repos_list` so the caller can resubmit them once capacity frees
/// up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddReposResponse {
    pub session_id: i64,
    pub jobs_created: usize,
    pub jobs: Vec<CreatedJobRef>,
    pub queued_repos: usize,
    pub queued_repos_list: Vec<RepoRef>,
    pub max_parallel_jobs: u32,
    /// Live in-flight count observed by the last admission check.
    pub active_jobs: u32,
}

// ============================================================================
// Status & results
// ============================================================================

/// Live status of one compute job, as reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusEntry {
    pub job_id: String,
    pub job_name: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanStatusResponse {
    pub session_id: i64,
    /// "running" | "completed"
    pub status: String,
    pub total_repos: usize,
    pub completed_repos: usize,
    pub failed_repos: usize,
    pub jobs: Vec<JobStatusEntry>,
}

/// One per-repository analysis result.
///
/// `output` is empty while the job is pending; the worker callback replaces
/// it with the terminal value exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub repo: String,
    pub url: String,
    pub success: bool,
    pub output: String,
    pub analyzed_at: DateTime<Utc>,
    pub artifact_uri: Option<String>,
    pub job_id: Option<String>,
    pub job_name: Option<String>,
}

impl AnalysisResult {
    /// A result is terminal once the worker has reported back.
    pub fn is_terminal(&self) -> bool {
        !self.output.is_empty()
    }
}

// ============================================================================
// Worker callback
// ============================================================================

/// Payload a worker container POSTs when its analysis reaches a terminal
/// state. Delivery is at-least-once; the orchestrator upserts idempotently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReport {
    pub job_id: String,
    pub session_id: i64,
    pub status: String,
    pub result: Option<WorkerResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResult {
    pub repo: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub artifact_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReportAck {
    pub status: String,
    pub job_id: String,
}
