//! Shared test fixtures: a scriptable in-memory compute backend and app
//! setup helpers.

// Not every test binary touches every helper.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use orchestrator::compute::{
    generate_job_name, ComputeBackend, CreatedJob, DispatchError, JobSpec, JobStatus,
};

/// How the fake backend answers the live active-job count.
pub enum CountMode {
    /// Always report the same count, regardless of jobs created — models a
    /// backend whose count has not yet caught up (or a saturated session).
    Fixed(u32),
    /// Report `base + jobs created so far` — models a backend that observes
    /// every created job immediately.
    TrackCreated { base: u32 },
}

pub struct MockCompute {
    count_mode: CountMode,
    pub fail_count: AtomicBool,
    pub fail_create: AtomicBool,
    pub created: Mutex<Vec<JobSpec>>,
    pub statuses: Mutex<HashMap<String, JobStatus>>,
}

impl MockCompute {
    pub fn new(count_mode: CountMode) -> Arc<Self> {
        Arc::new(Self {
            count_mode,
            fail_count: AtomicBool::new(false),
            fail_create: AtomicBool::new(false),
            created: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
        })
    }

    pub fn created_repos(&self) -> Vec<String> {
        self.created
            .lock()
            .unwrap()
            .iter()
            .map(|spec| spec.repo_name.clone())
            .collect()
    }
}

#[async_trait]
impl ComputeBackend for MockCompute {
    async fn create_job(&self, spec: &JobSpec) -> Result<CreatedJob, DispatchError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected("simulated create failure".into()));
        }
        let job_name = generate_job_name(spec.session_id, &spec.repo_name);
        let job_id = format!("job-{}", self.created.lock().unwrap().len() + 1);
        self.created.lock().unwrap().push(spec.clone());
        Ok(CreatedJob { job_name, job_id })
    }

    async fn job_status(&self, job_name: &str) -> Result<JobStatus, DispatchError> {
        self.statuses
            .lock()
            .unwrap()
            .get(job_name)
            .cloned()
            .ok_or_else(|| DispatchError::NotFound(job_name.to_string()))
    }

    async fn count_active_jobs(&self, _session_id: i64) -> Result<u32, DispatchError> {
        if self.fail_count.load(Ordering::SeqCst) {
            return Err(DispatchError::Rejected("simulated count failure".into()));
        }
        Ok(match self.count_mode {
            CountMode::Fixed(n) => n,
            CountMode::TrackCreated { base } => {
                base + self.created.lock().unwrap().len() as u32
            }
        })
    }

    async fn delete_job(&self, _job_name: &str) -> Result<(), DispatchError> {
        Ok(())
    }
}
