use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSession {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub allowed_urls: Vec<String>,
    pub access_code: String,
    pub is_active: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ExamSession {
    /// A session can be joined iff it is active and `now` falls inside its
    /// optional start/end window.
    pub fn is_joinable(&self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        if let Some(start) = self.start_time {
            if now < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if now > end {
                return false;
            }
        }
        true
    }

    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        self.end_time.map(|end| now > end).unwrap_or(false)
    }
}
