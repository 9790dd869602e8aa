use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::exam_attempt::{AttemptStatus, ExamAttempt, ViolationType};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ValidateCodeRequest {
    #[validate(length(min = 1, message = "Access code is required"))]
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    pub session_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub allowed_urls: Vec<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StartAttemptRequest {
    pub session_id: Uuid,
    #[validate(length(max = 200))]
    pub student_name: Option<String>,
    #[validate(length(max = 100))]
    pub student_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInfoResponse {
    pub attempt_id: Uuid,
    pub session_id: Uuid,
    pub session_name: String,
    pub allowed_urls: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ViolationPayload {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    #[validate(length(min = 1, message = "Violation description is required"))]
    pub description: String,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ReportViolationRequest {
    pub attempt_id: Uuid,
    #[validate(nested)]
    pub violation: ViolationPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EndAttemptRequest {
    pub attempt_id: Uuid,
    #[validate(length(min = 1, message = "Reason is required"))]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndAttemptResponse {
    pub message: String,
    pub attempt: ExamAttempt,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub attempt_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptStatusResponse {
    pub status: AttemptStatus,
    pub should_terminate: bool,
    pub end_time: Option<DateTime<Utc>>,
}
