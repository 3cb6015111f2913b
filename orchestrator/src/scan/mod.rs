//! Session lifecycle, repo intake with admission control, and status
//! aggregation.
//!
//! Handlers are invoked concurrently by independent requests with no shared
//! in-process state beyond the store and dispatcher handles; correctness
//! rests on the store's admission critical section, because real contention
//! crosses process boundaries.

use std::sync::Arc;

use tracing::{info, warn};

use shared_types::{
    AddReposResponse, AnalysisResult, CreateScanRequest, CreateScanResponse, CreatedJobRef,
    JobStatusEntry, RepoRef, ScanStatusResponse, ScanSummary, WorkerReport, WorkerReportAck,
};

use crate::compute::{ComputeBackend, DispatchError, JobSpec};
use crate::error::ApiError;
use crate::store::{Fingerprint, NewResult, ResultStore, Session};
use crate::validate;

/// Session status as reported to callers. A session with no results yet
/// reports `running` — callers distinguish "unknown session" (404) from
/// "nothing reported yet" (running, zero totals).
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_RUNNING: &str = "running";
pub const STATUS_COMPLETED: &str = "completed";

/// All orchestration state, constructed once at startup and injected into
/// every handler. The compute backend is an optional capability: absent,
/// repo intake answers with a typed 503 instead of dispatching.
pub struct ScanOrchestrator {
    store: ResultStore,
    compute: Option<Arc<dyn ComputeBackend>>,
    max_parallel_jobs: u32,
}

impl ScanOrchestrator {
    pub fn new(
        store: ResultStore,
        compute: Option<Arc<dyn ComputeBackend>>,
        max_parallel_jobs: u32,
    ) -> Self {
        Self {
            store,
            compute,
            max_parallel_jobs,
        }
    }

    fn compute(&self) -> Result<&Arc<dyn ComputeBackend>, ApiError> {
        self.compute.as_ref().ok_or(ApiError::ComputeUnavailable)
    }

    async fn require_session(&self, session_id: i64) -> Result<Session, ApiError> {
        validate::validate_session_id(session_id)?;
        self.store
            .get_session(session_id)
            .await?
            .ok_or(ApiError::SessionNotFound(session_id))
    }

    /// Create a new scan session. Always inserts; resume lookups go through
    /// [`ScanOrchestrator::find_scan`].
    pub async fn create_scan(
        &self,
        request: CreateScanRequest,
    ) -> Result<CreateScanResponse, ApiError> {
        let rules_path = validate::validate_rules_path(request.rules_path.as_deref())?;
        let fingerprint = Fingerprint {
            query: request.query.clone(),
            rules_path,
            use_pro: request.use_pro,
        };
        let session_id = self.store.create_session(&fingerprint).await?;
        info!(session_id, query = %request.query, "scan session created");
        Ok(CreateScanResponse {
            session_id,
            query: request.query,
            status: STATUS_PENDING.to_string(),
        })
    }

    /// Most recent session with an identical fingerprint, for resume.
    pub async fn find_scan(&self, fingerprint: &Fingerprint) -> Result<Option<i64>, ApiError> {
        Ok(self.store.find_session(fingerprint).await?)
    }

    pub async fn list_scans(&self) -> Result<Vec<ScanSummary>, ApiError> {
        let sessions = self.store.list_sessions().await?;
        Ok(sessions
            .into_iter()
            .map(|s| ScanSummary {
                session_id: s.id,
                query: s.query,
                rules_path: s.rules_path,
                use_pro: s.use_pro,
                created_at: s.created_at,
                status: s.status,
                result_count: s.result_count,
                success_count: s.success_count,
            })
            .collect())
    }

    /// Admit repos into a session, creating one compute job per granted
    /// slot.
    ///
    /// Safe to call repeatedly with overlapping repo lists: repos already
    /// known to the session are skipped, denied repos come back in the
    /// queued list for the caller to resubmit. The live in-flight count is
    /// re-queried per candidate (inside the store's critical section), so a
    /// slot freed mid-batch is picked up by a later candidate.
    pub async fn add_repos(
        &self,
        session_id: i64,
        repos: Vec<RepoRef>,
    ) -> Result<AddReposResponse, ApiError> {
        for repo in &repos {
            validate::validate_repo_name(&repo.name)?;
            validate::validate_repo_url(&repo.url)?;
        }
        let session = self.require_session(session_id).await?;
        let compute = self.compute()?.clone();

        let mut known = self.store.analyzed_repo_names(session_id).await?;
        let mut jobs: Vec<CreatedJobRef> = Vec::new();
        let mut queued: Vec<RepoRef> = Vec::new();
        let mut last_active: u32 = 0;

        for repo in repos {
            if known.contains(&repo.name) {
                continue;
            }

            let decision = self
                .store
                .acquire_slot(session_id, self.max_parallel_jobs, compute.as_ref())
                .await?;
            last_active = decision.active;
            if !decision.granted {
                queued.push(repo);
                continue;
            }

            // Job creation happens outside the admission lock; a slow
            // backend call must not serialize other admitters.
            let spec = JobSpec {
                repo_url: repo.url.clone(),
                repo_name: repo.name.clone(),
                session_id,
                analysis_args: String::new(),
                rules_path: session.rules_path.clone(),
                use_pro: session.use_pro,
            };
            let created = match compute.create_job(&spec).await {
                Ok(created) => created,
                Err(e) => {
                    // One bad repo never aborts the batch; it can be
                    // resubmitted later since no row was written.
                    warn!(repo = %repo.name, error = %e, "job creation failed; skipping repo");
                    continue;
                }
            };

            // Insert-if-absent: if the worker already reported (callbacks
            // interleave with admission), the terminal row wins.
            self.store
                .insert_result_pending(&NewResult {
                    session_id,
                    repo_name: repo.name.clone(),
                    repo_url: repo.url.clone(),
                    success: false,
                    output: String::new(),
                    artifact_uri: None,
                    job_id: Some(created.job_id.clone()),
                    job_name: Some(created.job_name.clone()),
                })
                .await?;

            known.insert(repo.name.clone());
            jobs.push(CreatedJobRef {
                repo_name: repo.name,
                job_name: created.job_name,
                job_id: created.job_id,
            });
        }

        if !jobs.is_empty() {
            self.store
                .update_session_status(session_id, STATUS_RUNNING)
                .await?;
            info!(session_id, jobs_created = jobs.len(), "compute jobs dispatched");
        }

        Ok(AddReposResponse {
            session_id,
            jobs_created: jobs.len(),
            jobs,
            queued_repos: queued.len(),
            queued_repos_list: queued,
            max_parallel_jobs: self.max_parallel_jobs,
            active_jobs: last_active,
        })
    }

    /// Worker callback: upsert the terminal result for one repo.
    ///
    /// Delivery is at-least-once and may interleave with `add_repos` for
    /// the same session; the idempotent upsert makes replays safe. The job
    /// name recorded on admission is preserved since workers do not know
    /// their backend resource name.
    pub async fn report_status(
        &self,
        job_id: String,
        report: WorkerReport,
    ) -> Result<WorkerReportAck, ApiError> {
        let Some(result) = report.result else {
            // Status-only pings carry nothing to persist.
            return Ok(WorkerReportAck {
                status: "ok".to_string(),
                job_id,
            });
        };

        validate::validate_session_id(report.session_id)?;
        if result.repo.is_empty() {
            return Err(ApiError::Validation(
                "missing required field 'repo' in result".into(),
            ));
        }

        let existing = self.store.get_result(report.session_id, &result.repo).await?;
        let job_name = existing.and_then(|row| row.job_name);

        self.store
            .upsert_result(&NewResult {
                session_id: report.session_id,
                repo_name: result.repo.clone(),
                repo_url: result.url,
                success: result.success,
                output: result.output,
                artifact_uri: result.artifact_uri,
                job_id: Some(job_id.clone()),
                job_name,
            })
            .await?;

        info!(
            session_id = report.session_id,
            repo = %result.repo,
            success = result.success,
            "worker result recorded"
        );

        // Opportunistic stored-status update for the listing; reads always
        // recompute from the rows.
        let results = self.store.list_results(report.session_id).await?;
        if !results.is_empty() && results.iter().all(AnalysisResult::is_terminal) {
            self.store
                .update_session_status(report.session_id, STATUS_COMPLETED)
                .await?;
        }

        Ok(WorkerReportAck {
            status: "ok".to_string(),
            job_id,
        })
    }

    /// Cancel one in-flight job. Deletion on the backend is idempotent, so
    /// cancelling an already-finished or garbage-collected job succeeds.
    pub async fn cancel_job(&self, job_name: &str) -> Result<(), ApiError> {
        let compute = self.compute()?;
        compute.delete_job(job_name).await.map_err(ApiError::from)?;
        info!(job_name, "job deleted");
        Ok(())
    }

    /// Aggregate session status, recomputed on every read.
    ///
    /// Terminality is observed from two possibly-divergent sources: the
    /// stored row (authoritative once the backend has garbage-collected the
    /// job) and the backend's live job status (reported alongside, for rows
    /// that still have a job). Completed/failed counts cover terminal rows
    /// only; pending rows count toward the total alone.
    pub async fn session_status(&self, session_id: i64) -> Result<ScanStatusResponse, ApiError> {
        self.require_session(session_id).await?;
        let results = self.store.list_results(session_id).await?;

        let total = results.len();
        let completed = results
            .iter()
            .filter(|r| r.is_terminal() && r.success)
            .count();
        let failed = results
            .iter()
            .filter(|r| r.is_terminal() && !r.success)
            .count();
        let all_terminal = !results.is_empty() && results.iter().all(AnalysisResult::is_terminal);

        let mut jobs = Vec::new();
        if let Some(compute) = &self.compute {
            for result in &results {
                let (Some(job_id), Some(job_name)) = (&result.job_id, &result.job_name) else {
                    continue;
                };
                match compute.job_status(job_name).await {
                    Ok(status) => jobs.push(JobStatusEntry {
                        job_id: job_id.clone(),
                        job_name: job_name.clone(),
                        status: status.phase().to_string(),
                    }),
                    Err(DispatchError::NotFound(_)) => {
                        // Garbage-collected after TTL; the stored row is
                        // authoritative, so nothing live to report.
                    }
                    Err(e) => {
                        warn!(job_name = %job_name, error = %e, "job status lookup failed");
                    }
                }
            }
        }

        let status = if all_terminal {
            STATUS_COMPLETED
        } else {
            STATUS_RUNNING
        };

        Ok(ScanStatusResponse {
            session_id,
            status: status.to_string(),
            total_repos: total,
            completed_repos: completed,
            failed_repos: failed,
            jobs,
        })
    }

    /// All results for a session; an empty array is a valid answer for a
    /// session that exists but has nothing reported yet.
    pub async fn session_results(
        &self,
        session_id: i64,
    ) -> Result<Vec<AnalysisResult>, ApiError> {
        self.require_session(session_id).await?;
        Ok(self.store.list_results(session_id).await?)
    }
}
