//! The driver loop: create or resume a session, drain queued repos against
//! a bounded retry budget, poll to completion, collect results.

use std::time::Duration;

use anyhow::Result;
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use shared_types::{AnalysisResult, CreateScanRequest, RepoRef};

use crate::client::ApiClient;

pub struct DriveOptions {
    /// How many times a queued subset is resubmitted before giving up.
    pub max_retries: u32,
    /// Fixed wait between queued-subset resubmissions.
    pub retry_interval: Duration,
    /// Fixed wait between status polls.
    pub poll_interval: Duration,
    /// Wall-clock ceiling on the whole wait-for-completion phase.
    pub max_wait: Duration,
}

/// Everything the summary needs. `queued_leftover` and `timed_out` flag the
/// partial-result conditions; neither is an error.
pub struct DriveOutcome {
    pub session_id: i64,
    pub resumed: bool,
    pub jobs_dispatched: usize,
    pub queued_leftover: Vec<RepoRef>,
    pub timed_out: bool,
    pub results: Vec<AnalysisResult>,
}

pub async fn drive(
    client: &ApiClient,
    request: CreateScanRequest,
    repos: Vec<RepoRef>,
    resume: bool,
    opts: &DriveOptions,
) -> Result<DriveOutcome> {
    // 1. Create or resume.
    let existing = if resume {
        client.lookup_scan(&request).await?
    } else {
        None
    };
    let (session_id, resumed) = match existing {
        Some(id) => {
            info!(session_id = id, "resuming existing session");
            (id, true)
        }
        None => {
            let created = client.create_scan(&request).await?;
            info!(session_id = created.session_id, "created new session");
            (created.session_id, false)
        }
    };

    // 2 & 3. Submit the full candidate set, then resubmit only the queued
    // subset until it drains or the retry budget runs out. The budget keeps
    // the driver terminating even if the backend never frees capacity.
    let mut batch = repos;
    let mut jobs_dispatched = 0;
    let mut queued_leftover = Vec::new();
    let mut retries = 0;

    while !batch.is_empty() {
        let response = client.add_repos(session_id, &batch).await?;
        jobs_dispatched += response.jobs_created;
        if response.jobs_created > 0 {
            info!(
                jobs_created = response.jobs_created,
                active_jobs = response.active_jobs,
                "jobs dispatched"
            );
        }

        if response.queued_repos_list.is_empty() {
            break;
        }
        if retries >= opts.max_retries {
            warn!(
                queued = response.queued_repos,
                "retry budget exhausted; reporting queued repos as partial"
            );
            queued_leftover = response.queued_repos_list;
            break;
        }
        retries += 1;
        info!(
            queued = response.queued_repos,
            retry = retries,
            "capacity full; retrying queued repos"
        );
        sleep(opts.retry_interval).await;
        batch = response.queued_repos_list;
    }

    // 4. Poll until completion or the wall-clock ceiling. Transient status
    // failures are retried on the same cadence.
    let mut timed_out = false;
    if jobs_dispatched > 0 {
        let started = Instant::now();
        loop {
            if started.elapsed() >= opts.max_wait {
                warn!(session_id, "wall-clock ceiling reached before completion");
                timed_out = true;
                break;
            }
            match client.scan_status(session_id).await {
                Ok(status) => {
                    info!(
                        status = %status.status,
                        completed = status.completed_repos,
                        total = status.total_repos,
                        "scan progress"
                    );
                    if status.status == "completed" {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "status poll failed; will retry"),
            }
            sleep(opts.poll_interval).await;
        }
    }

    // 5. Fetch whatever is durable, complete or not.
    let results = client.scan_results(session_id).await?;

    Ok(DriveOutcome {
        session_id,
        resumed,
        jobs_dispatched,
        queued_leftover,
        timed_out,
        results,
    })
}

/// Render the final summary lines.
pub fn summarize(outcome: &DriveOutcome) -> String {
    let successes = outcome.results.iter().filter(|r| r.success).count();
    let total = outcome.results.len();
    let failed = total - successes;

    let mut out = format!(
        "Session {}: analyzed {successes}/{total} repositories successfully, {failed} failed",
        outcome.session_id
    );
    if !outcome.queued_leftover.is_empty() {
        out.push_str(&format!(
            "\nPartial: {} repositories never got a slot (retry budget exhausted)",
            outcome.queued_leftover.len()
        ));
    }
    if outcome.timed_out {
        out.push_str("\nPartial: wait ceiling reached before all jobs completed");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(repo: &str, success: bool) -> AnalysisResult {
        AnalysisResult {
            repo: repo.into(),
            url: format!("https://github.com/{repo}"),
            success,
            output: "findings".into(),
            analyzed_at: chrono::Utc::now(),
            artifact_uri: None,
            job_id: None,
            job_name: None,
        }
    }

    #[test]
    fn summary_counts_successes_and_failures() {
        let outcome = DriveOutcome {
            session_id: 3,
            resumed: false,
            jobs_dispatched: 2,
            queued_leftover: vec![],
            timed_out: false,
            results: vec![result("a/b", true), result("c/d", false)],
        };
        let text = summarize(&outcome);
        assert!(text.contains("analyzed 1/2"));
        assert!(!text.contains("Partial"));
    }

    #[test]
    fn summary_flags_partial_conditions() {
        let outcome = DriveOutcome {
            session_id: 3,
            resumed: true,
            jobs_dispatched: 1,
            queued_leftover: vec![RepoRef {
                name: "x/y".into(),
                url: "https://github.com/x/y".into(),
            }],
            timed_out: true,
            results: vec![result("a/b", true)],
        };
        let text = summarize(&outcome);
        assert!(text.contains("never got a slot"));
        assert!(text.contains("wait ceiling"));
    }
}
