//! HTTP job lookup.
//!
//! Events on the broadcast channel only describe status changes. A job
//! that finished before anyone watched it never produces another event,
//! so waiters fall back to asking the compute service directly through a
//! [`JobLookup`].

use async_trait::async_trait;
use cl_core::job::JobSnapshot;
use cl_core::types::TimestampMs;
use serde::Deserialize;

/// Source of authoritative job state.
#[async_trait]
pub trait JobLookup: Send + Sync {
    async fn get_job(&self, job_id: &str) -> Result<JobSnapshot, ApiError>;
}

/// Errors from the job lookup layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Compute API error ({status}): {body}")]
    ApiError {
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

/// Job record as served by `GET /jobs/{job_id}`.
#[derive(Debug, Deserialize)]
struct JobRecord {
    job_id: String,
    task_type: String,
    status: String,
    #[serde(default)]
    progress: Option<f64>,
    created_at: TimestampMs,
    #[serde(default)]
    task_output: Option<serde_json::Value>,
    #[serde(default)]
    error_message: Option<String>,
}

impl From<JobRecord> for JobSnapshot {
    fn from(record: JobRecord) -> Self {
        let mut snapshot = JobSnapshot::from_event(
            record.job_id,
            record.task_type,
            record.status,
            record.progress,
            record.created_at,
        );
        snapshot.task_output = record.task_output;
        snapshot.error_message = record.error_message;
        snapshot
    }
}

/// [`JobLookup`] over the compute service's REST API.
pub struct HttpJobLookup {
    client: reqwest::Client,
    base_url: String,
}

impl HttpJobLookup {
    /// * `base_url` - e.g. `http://host:8002`. A trailing slash is ignored.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl JobLookup for HttpJobLookup {
    async fn get_job(&self, job_id: &str) -> Result<JobSnapshot, ApiError> {
        let response = self.client.get(self.job_url(job_id)).send().await?;
        let response = Self::ensure_success(response).await?;
        let record = response.json::<JobRecord>().await?;
        Ok(record.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_url_strips_trailing_slash() {
        let lookup = HttpJobLookup::new("http://compute:8002/");
        assert_eq!(lookup.job_url("abc"), "http://compute:8002/jobs/abc");
    }

    #[test]
    fn record_fills_lookup_only_fields() {
        let record: JobRecord = serde_json::from_str(
            r#"{
                "job_id": "j1",
                "task_type": "clip_embedding",
                "status": "failed",
                "progress": 40,
                "params": {"image": "a.jpg"},
                "priority": 5,
                "created_at": 1700000000000,
                "error_message": "out of memory"
            }"#,
        )
        .unwrap();

        let snapshot = JobSnapshot::from(record);
        assert_eq!(snapshot.progress, 40);
        assert!(snapshot.is_terminal());
        assert_eq!(snapshot.error_message.as_deref(), Some("out of memory"));
        assert!(snapshot.task_output.is_none());
    }

    #[test]
    fn missing_progress_defaults_to_zero() {
        let record: JobRecord = serde_json::from_str(
            r#"{"job_id":"j1","task_type":"hash","status":"queued","created_at":5}"#,
        )
        .unwrap();
        assert_eq!(JobSnapshot::from(record).progress, 0);
    }
}
