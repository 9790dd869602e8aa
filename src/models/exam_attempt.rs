use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Active,
    Completed,
    Terminated,
    TimeExpired,
}

impl AttemptStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AttemptStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    ShortcutBlocked,
    KeyBlocked,
    FocusLost,
    NavigationBlocked,
    AppOpened,
    BlacklistedProcess,
    VirtualMachine,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub description: String,
    pub details: Option<String>,
    /// Assigned by the server at receipt time, never taken from the client.
    pub timestamp: DateTime<Utc>,
    /// Position within the attempt's violation list.
    pub seq: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAttempt {
    pub id: Uuid,
    pub session_id: Uuid,
    pub student_name: Option<String>,
    pub student_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub status: AttemptStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub violations: Vec<Violation>,
}

impl ExamAttempt {
    pub fn new(
        session_id: Uuid,
        student_name: Option<String>,
        student_id: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            student_name,
            student_id,
            ip_address,
            user_agent,
            status: AttemptStatus::Active,
            started_at: Utc::now(),
            ended_at: None,
            violations: Vec::new(),
        }
    }
}
