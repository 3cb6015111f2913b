//! Abstraction over job creation, naming, status, and deletion on the
//! external compute backend.
//!
//! The orchestrator only ever talks to [`ComputeBackend`]; the production
//! implementation is [`kubernetes::KubeBackend`], and tests substitute
//! in-memory fakes.

pub mod kubernetes;

use async_trait::async_trait;
use uuid::Uuid;

pub use kubernetes::{KubeBackend, KubeSettings};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("compute backend rejected request: {0}")]
    Rejected(String),

    #[error("compute backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected compute backend response: {0}")]
    InvalidResponse(String),
}

/// Everything the backend needs to run one per-repository analysis job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub repo_url: String,
    pub repo_name: String,
    pub session_id: i64,
    pub analysis_args: String,
    pub rules_path: Option<String>,
    pub use_pro: bool,
}

#[derive(Debug, Clone)]
pub struct CreatedJob {
    /// Backend resource name, unique per job, meets the backend's naming
    /// constraints.
    pub job_name: String,
    /// Opaque token injected into the worker's environment so the callback
    /// can report results without knowing the resource name.
    pub job_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct JobCondition {
    pub condition_type: String,
    pub status: String,
    pub message: String,
}

/// Live status of one backend job.
#[derive(Debug, Clone, Default)]
pub struct JobStatus {
    pub name: String,
    pub active: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub conditions: Vec<JobCondition>,
}

impl JobStatus {
    /// A job is terminal once a pod finished (either way) and none remain
    /// active.
    pub fn is_terminal(&self) -> bool {
        (self.succeeded > 0 || self.failed > 0) && self.active == 0
    }

    /// Human-readable phase for status responses.
    pub fn phase(&self) -> &'static str {
        if self.active > 0 {
            "active"
        } else if self.succeeded > 0 {
            "succeeded"
        } else if self.failed > 0 {
            "failed"
        } else {
            "pending"
        }
    }
}

#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Create one analysis job. A failure here must not abort the caller's
    /// batch — intake logs it and moves on to the next repo.
    async fn create_job(&self, spec: &JobSpec) -> Result<CreatedJob, DispatchError>;

    /// Live status; [`DispatchError::NotFound`] after TTL cleanup is
    /// distinct from a failed job.
    async fn job_status(&self, job_name: &str) -> Result<JobStatus, DispatchError>;

    /// Count of this session's jobs with at least one active pod — the
    /// authority consulted by the admission check.
    async fn count_active_jobs(&self, session_id: i64) -> Result<u32, DispatchError>;

    /// Idempotent delete; not-found is success.
    async fn delete_job(&self, job_name: &str) -> Result<(), DispatchError>;
}

/// Backend resource names must be lowercase alphanumeric plus hyphens and
/// at most 63 characters.
const MAX_JOB_NAME: usize = 63;
const JOB_NAME_PREFIX: &str = "dragnet";
/// Sanitized repo segment cap, leaving room for prefix, session id, and
/// the uniqueness suffix.
const MAX_REPO_SEGMENT: usize = 40;

/// Build a deterministic-prefix, sanitized, uniqueness-suffixed job name:
/// `dragnet-{session}-{repo}-{uuid8}`.
pub fn generate_job_name(session_id: i64, repo_name: &str) -> String {
    let safe_repo: String = repo_name
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            _ => '-',
        })
        .collect();
    let safe_repo = safe_repo.trim_matches('-');

    let suffix = Uuid::new_v4().simple().to_string()[..8].to_string();
    let fixed = format!("{JOB_NAME_PREFIX}-{session_id}--{suffix}").len();
    let budget = MAX_JOB_NAME
        .saturating_sub(fixed)
        .min(MAX_REPO_SEGMENT)
        .min(safe_repo.len());
    let safe_repo = safe_repo[..budget].trim_end_matches('-');

    format!("{JOB_NAME_PREFIX}-{session_id}-{safe_repo}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_names_are_sanitized_and_bounded() {
        let name = generate_job_name(42, "Some_Owner/My.Repo");
        assert!(name.starts_with("dragnet-42-some-owner-my-repo-"));
        assert!(name.len() <= MAX_JOB_NAME);
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
    }

    #[test]
    fn long_repo_names_are_truncated() {
        let long = format!("{}/{}", "o".repeat(80), "r".repeat(80));
        let name = generate_job_name(i64::from(i32::MAX), &long);
        assert!(name.len() <= MAX_JOB_NAME, "got {} chars", name.len());
    }

    #[test]
    fn job_names_are_unique_per_call() {
        let a = generate_job_name(1, "owner/repo");
        let b = generate_job_name(1, "owner/repo");
        assert_ne!(a, b);
    }

    #[test]
    fn terminality_requires_no_active_pods() {
        let running = JobStatus {
            active: 1,
            succeeded: 0,
            failed: 0,
            ..Default::default()
        };
        assert!(!running.is_terminal());
        assert_eq!(running.phase(), "active");

        let done = JobStatus {
            active: 0,
            succeeded: 1,
            failed: 0,
            ..Default::default()
        };
        assert!(done.is_terminal());
        assert_eq!(done.phase(), "succeeded");

        let retrying = JobStatus {
            active: 1,
            succeeded: 0,
            failed: 1,
            ..Default::default()
        };
        assert!(!retrying.is_terminal());

        let fresh = JobStatus::default();
        assert!(!fresh.is_terminal());
        assert_eq!(fresh.phase(), "pending");
    }
}
