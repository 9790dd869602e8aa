//! HTTP client for the student surface; this is the reporting path the
//! lockdown hands its classified violations to.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::json;
use uuid::Uuid;

use crate::dto::student_dto::{
    AttemptInfoResponse, AttemptStatusResponse, EndAttemptResponse, SessionInfoResponse,
};
use crate::error::{Error, Result};
use crate::lockdown::{ViolationReport, ViolationSink};

#[derive(Clone)]
pub struct StudentApiClient {
    base_url: String,
    http: reqwest::Client,
}

impl StudentApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(Error::Reqwest)?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn validate_code(&self, code: &str) -> Result<SessionInfoResponse> {
        let resp = self
            .http
            .post(format!("{}/api/student/validate-code", self.base_url))
            .json(&json!({ "code": code }))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn start_attempt(
        &self,
        session_id: Uuid,
        student_name: Option<&str>,
        student_id: Option<&str>,
    ) -> Result<AttemptInfoResponse> {
        let resp = self
            .http
            .post(format!("{}/api/student/start-attempt", self.base_url))
            .json(&json!({
                "sessionId": session_id,
                "studentName": student_name,
                "studentId": student_id,
            }))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn report_violation(
        &self,
        attempt_id: Uuid,
        violation: &ViolationReport,
    ) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/student/report-violation", self.base_url))
            .json(&json!({
                "attemptId": attempt_id,
                "violation": violation,
            }))
            .send()
            .await?;
        decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn end_attempt(&self, attempt_id: Uuid, reason: &str) -> Result<EndAttemptResponse> {
        let resp = self
            .http
            .post(format!("{}/api/student/end-attempt", self.base_url))
            .json(&json!({
                "attemptId": attempt_id,
                "reason": reason,
            }))
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn heartbeat(&self, attempt_id: Uuid) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/api/student/heartbeat", self.base_url))
            .json(&json!({ "attemptId": attempt_id }))
            .send()
            .await?;
        decode::<serde_json::Value>(resp).await.map(|_| ())
    }

    pub async fn check_status(&self, attempt_id: Uuid) -> Result<AttemptStatusResponse> {
        let resp = self
            .http
            .get(format!(
                "{}/api/student/attempt/{}/status",
                self.base_url, attempt_id
            ))
            .send()
            .await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let message = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
        .unwrap_or_else(|| format!("HTTP {}", status));
    Err(match status.as_u16() {
        400 => Error::BadRequest(message),
        401 => Error::Unauthorized(message),
        403 => Error::Forbidden(message),
        404 => Error::NotFound(message),
        409 => Error::Conflict(message),
        _ => Error::Internal(message),
    })
}

/// Fire-and-forget bridge from the controller's violation stream to the
/// network. A failed report is logged; the monitor will produce fresh
/// signals, so nothing is queued.
pub struct HttpViolationSink {
    api: std::sync::Arc<StudentApiClient>,
}

impl HttpViolationSink {
    pub fn new(api: std::sync::Arc<StudentApiClient>) -> Self {
        Self { api }
    }
}

impl ViolationSink for HttpViolationSink {
    fn report(&self, attempt_id: Uuid, violation: ViolationReport) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.report_violation(attempt_id, &violation).await {
                tracing::warn!(%attempt_id, error = %e, "failed to report violation");
            }
        });
    }
}
