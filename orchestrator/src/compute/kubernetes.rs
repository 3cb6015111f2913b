//! Kubernetes `batch/v1` implementation of the compute backend, speaking
//! plain REST through reqwest.
//!
//! Works both in-cluster (service-account bearer token file) and against a
//! dev cluster (`KUBE_API_URL` + `KUBE_TOKEN`, optionally skipping TLS
//! verification for self-signed API endpoints).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{
    generate_job_name, ComputeBackend, CreatedJob, DispatchError, JobCondition, JobSpec, JobStatus,
};

/// Label identifying this service's jobs; admission counting filters on it.
pub const APP_LABEL: &str = "dragnet-worker";

#[derive(Debug, Clone)]
pub struct KubeSettings {
    /// API server base URL, e.g. `https://kubernetes.default.svc`.
    pub api_url: String,
    /// Bearer token; resolved from config or the service-account file.
    pub token: Option<String>,
    pub insecure_tls: bool,
    pub namespace: String,
    pub worker_image: String,
    pub job_ttl: Duration,
    /// Base URL workers call back with their terminal result.
    pub callback_base_url: String,
    pub artifact_bucket: Option<String>,
    pub aws_region: String,
}

pub struct KubeBackend {
    client: reqwest::Client,
    settings: KubeSettings,
}

impl KubeBackend {
    pub fn new(settings: KubeSettings) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(settings.insecure_tls)
            .build()?;
        info!(
            api_url = %settings.api_url,
            namespace = %settings.namespace,
            "kubernetes compute backend ready"
        );
        Ok(Self { client, settings })
    }

    fn jobs_url(&self) -> String {
        format!(
            "{}/apis/batch/v1/namespaces/{}/jobs",
            self.settings.api_url.trim_end_matches('/'),
            self.settings.namespace
        )
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let Some(token) = &self.settings.token {
            req = req.bearer_auth(token);
        }
        req
    }

    /// Job manifest for one repository analysis. Labels carry the session
    /// and job ids so status counting and cleanup can select by label.
    fn job_manifest(&self, spec: &JobSpec, job_name: &str, job_id: &str) -> Value {
        let mut env = vec![
            json!({"name": "REPO_URL", "value": spec.repo_url}),
            json!({"name": "REPO_NAME", "value": spec.repo_name}),
            json!({"name": "JOB_ID", "value": job_id}),
            json!({"name": "SESSION_ID", "value": spec.session_id.to_string()}),
            json!({"name": "ANALYSIS_ARGS", "value": spec.analysis_args}),
            json!({"name": "USE_PRO", "value": if spec.use_pro { "true" } else { "false" }}),
            json!({"name": "API_URL", "value": self.settings.callback_base_url}),
        ];
        if let Some(bucket) = &self.settings.artifact_bucket {
            env.push(json!({"name": "ARTIFACT_BUCKET", "value": bucket}));
            env.push(json!({"name": "AWS_REGION", "value": self.settings.aws_region}));
        }
        if let Some(rules) = &spec.rules_path {
            env.push(json!({"name": "RULES_PATH", "value": rules}));
        }

        let labels = json!({
            "app": APP_LABEL,
            "session-id": spec.session_id.to_string(),
            "job-id": job_id,
        });

        json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {
                "name": job_name,
                "namespace": self.settings.namespace,
                "labels": labels.clone(),
            },
            "spec": {
                "ttlSecondsAfterFinished": self.settings.job_ttl.as_secs(),
                "backoffLimit": 2,
                "template": {
                    "metadata": {"labels": labels},
                    "spec": {
                        "restartPolicy": "Never",
                        "containers": [{
                            "name": "analysis-worker",
                            "image": self.settings.worker_image,
                            "env": env,
                            "resources": {
                                "requests": {"memory": "1Gi", "cpu": "500m"},
                                "limits": {"memory": "4Gi", "cpu": "2000m"},
                            },
                        }],
                    },
                },
            },
        })
    }
}

#[async_trait]
impl ComputeBackend for KubeBackend {
    async fn create_job(&self, spec: &JobSpec) -> Result<CreatedJob, DispatchError> {
        let job_id = uuid::Uuid::new_v4().to_string();
        let job_name = generate_job_name(spec.session_id, &spec.repo_name);
        let manifest = self.job_manifest(spec, &job_name, &job_id);

        let response = self
            .request(reqwest::Method::POST, &self.jobs_url())
            .json(&manifest)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected(format!(
                "create {job_name}: {status}: {body}"
            )));
        }

        debug!(job_name = %job_name, repo = %spec.repo_name, "job created");
        Ok(CreatedJob { job_name, job_id })
    }

    async fn job_status(&self, job_name: &str) -> Result<JobStatus, DispatchError> {
        let url = format!("{}/{job_name}", self.jobs_url());
        let response = self.request(reqwest::Method::GET, &url).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(DispatchError::NotFound(job_name.to_string()));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(DispatchError::Rejected(format!(
                "status {job_name}: {status}"
            )));
        }

        let body: Value = response.json().await?;
        Ok(parse_job_status(job_name, &body))
    }

    async fn count_active_jobs(&self, session_id: i64) -> Result<u32, DispatchError> {
        let selector = format!("app={APP_LABEL},session-id={session_id}");
        let response = self
            .request(reqwest::Method::GET, &self.jobs_url())
            .query(&[("labelSelector", selector.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(DispatchError::Rejected(format!(
                "list jobs for session {session_id}: {status}"
            )));
        }

        let body: Value = response.json().await?;
        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| DispatchError::InvalidResponse("job list without items".into()))?;

        let active = items
            .iter()
            .filter(|item| {
                item.pointer("/status/active")
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    > 0
            })
            .count();
        Ok(active as u32)
    }

    async fn delete_job(&self, job_name: &str) -> Result<(), DispatchError> {
        let url = format!("{}/{job_name}", self.jobs_url());
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .query(&[("propagationPolicy", "Background")])
            .send()
            .await?;

        // Already gone is success; delete must be idempotent.
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            return Ok(());
        }
        let status = response.status();
        Err(DispatchError::Rejected(format!(
            "delete {job_name}: {status}"
        )))
    }
}

fn parse_job_status(job_name: &str, body: &Value) -> JobStatus {
    let get = |field: &str| {
        body.pointer(&format!("/status/{field}"))
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32
    };

    let conditions = body
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|conds| {
            conds
                .iter()
                .map(|c| JobCondition {
                    condition_type: str_field(c, "type"),
                    status: str_field(c, "status"),
                    message: str_field(c, "message"),
                })
                .collect()
        })
        .unwrap_or_default();

    JobStatus {
        name: job_name.to_string(),
        active: get("active"),
        succeeded: get("succeeded"),
        failed: get("failed"),
        conditions,
    }
}

fn str_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> KubeSettings {
        KubeSettings {
            api_url: "https://kubernetes.default.svc".into(),
            token: Some("secret".into()),
            insecure_tls: false,
            namespace: "scans".into(),
            worker_image: "dragnet-worker:latest".into(),
            job_ttl: Duration::from_secs(3600),
            callback_base_url: "http://orchestrator:8000".into(),
            artifact_bucket: Some("scan-artifacts".into()),
            aws_region: "us-east-1".into(),
        }
    }

    #[test]
    fn manifest_carries_labels_env_and_ttl() {
        let backend = KubeBackend::new(settings()).unwrap();
        let spec = JobSpec {
            repo_url: "https://github.com/owner/repo".into(),
            repo_name: "owner/repo".into(),
            session_id: 7,
            analysis_args: String::new(),
            rules_path: Some("/rules/custom.yaml".into()),
            use_pro: true,
        };
        let manifest = backend.job_manifest(&spec, "dragnet-7-owner-repo-abcd1234", "job-id-1");

        assert_eq!(manifest["metadata"]["labels"]["session-id"], "7");
        assert_eq!(manifest["metadata"]["labels"]["job-id"], "job-id-1");
        assert_eq!(manifest["spec"]["ttlSecondsAfterFinished"], 3600);
        assert_eq!(manifest["spec"]["backoffLimit"], 2);

        let env = manifest["spec"]["template"]["spec"]["containers"][0]["env"]
            .as_array()
            .unwrap();
        let lookup = |name: &str| {
            env.iter()
                .find(|e| e["name"] == name)
                .map(|e| e["value"].as_str().unwrap().to_string())
        };
        assert_eq!(lookup("REPO_NAME").unwrap(), "owner/repo");
        assert_eq!(lookup("SESSION_ID").unwrap(), "7");
        assert_eq!(lookup("JOB_ID").unwrap(), "job-id-1");
        assert_eq!(lookup("USE_PRO").unwrap(), "true");
        assert_eq!(lookup("RULES_PATH").unwrap(), "/rules/custom.yaml");
        assert_eq!(lookup("ARTIFACT_BUCKET").unwrap(), "scan-artifacts");
        assert_eq!(lookup("API_URL").unwrap(), "http://orchestrator:8000");
    }

    #[test]
    fn job_status_parses_counts_and_conditions() {
        let body = json!({
            "status": {
                "active": 0,
                "succeeded": 1,
                "conditions": [
                    {"type": "Complete", "status": "True", "message": "done"}
                ]
            }
        });
        let status = parse_job_status("dragnet-1-x-abcd1234", &body);
        assert_eq!(status.succeeded, 1);
        assert_eq!(status.failed, 0);
        assert!(status.is_terminal());
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].condition_type, "Complete");
    }
}
