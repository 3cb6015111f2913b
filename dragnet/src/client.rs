//! HTTP client for the orchestrator API.

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};

use shared_types::{
    AddReposRequest, AddReposResponse, AnalysisResult, CreateScanRequest, CreateScanResponse,
    RepoRef, ScanLookupResponse, ScanStatusResponse,
};

pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Creates a new scan session.
    pub async fn create_scan(&self, request: &CreateScanRequest) -> Result<CreateScanResponse> {
        let url = format!("{}/api/v1/scans", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            response.json().await.context("Failed to parse response")
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    /// Looks up the most recent session with the same fingerprint; `None`
    /// when nothing matches (fresh analysis).
    pub async fn lookup_scan(&self, request: &CreateScanRequest) -> Result<Option<i64>> {
        let url = format!("{}/api/v1/scans/lookup", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("query", request.query.clone()),
            ("use_pro", request.use_pro.to_string()),
        ];
        if let Some(rules) = &request.rules_path {
            query.push(("rules_path", rules.clone()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if response.status().is_success() {
            let body: ScanLookupResponse =
                response.json().await.context("Failed to parse response")?;
            Ok(Some(body.session_id))
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    /// Submits a repo batch; denied repos come back in the queued list.
    pub async fn add_repos(&self, session_id: i64, repos: &[RepoRef]) -> Result<AddReposResponse> {
        let url = format!("{}/api/v1/scans/{session_id}/repos", self.base_url);
        let request = AddReposRequest {
            repos: repos.to_vec(),
        };
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            response.json().await.context("Failed to parse response")
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    /// Gets aggregate session status.
    pub async fn scan_status(&self, session_id: i64) -> Result<ScanStatusResponse> {
        let url = format!("{}/api/v1/scans/{session_id}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            response.json().await.context("Failed to parse response")
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }

    /// Fetches the full result rows for a session.
    pub async fn scan_results(&self, session_id: i64) -> Result<Vec<AnalysisResult>> {
        let url = format!("{}/api/v1/scans/{session_id}/results", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to send request")?;

        if response.status().is_success() {
            response.json().await.context("Failed to parse response")
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({status}): {body}")
        }
    }
}
