//! In-memory authority over exam sessions and attempts.
//!
//! All mutations go through this store. Violation appends take the attempts
//! write lock and stamp the timestamp inside the critical section, so two
//! near-simultaneous reports are both kept, in receipt order, with
//! non-decreasing timestamps.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::exam_attempt::{AttemptStatus, ExamAttempt, Violation, ViolationType};
use crate::models::exam_session::ExamSession;

#[derive(Debug)]
pub enum ViolationAppend {
    Appended { violation: Violation, total: usize },
    /// The attempt exists but is no longer active; the report is dropped.
    Ignored { status: AttemptStatus },
}

#[derive(Debug)]
pub enum EndOutcome {
    Ended(ExamAttempt),
    AlreadyEnded(ExamAttempt),
}

#[derive(Default)]
pub struct Store {
    sessions: RwLock<HashMap<Uuid, ExamSession>>,
    /// Normalized access code -> session id.
    codes: RwLock<HashMap<String, Uuid>>,
    attempts: RwLock<HashMap<Uuid, ExamAttempt>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_session(&self, session: ExamSession) {
        self.codes
            .write()
            .await
            .insert(session.access_code.clone(), session.id);
        self.sessions.write().await.insert(session.id, session);
    }

    pub async fn code_in_use(&self, code: &str) -> bool {
        self.codes.read().await.contains_key(code)
    }

    pub async fn session(&self, id: Uuid) -> Option<ExamSession> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn session_by_code(&self, normalized_code: &str) -> Option<ExamSession> {
        let id = *self.codes.read().await.get(normalized_code)?;
        self.session(id).await
    }

    pub async fn list_sessions(&self) -> Vec<ExamSession> {
        let mut sessions: Vec<_> = self.sessions.read().await.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    /// Apply `update` to a session under the write lock. Returns the updated
    /// session, or `None` when it does not exist.
    pub async fn update_session<F>(&self, id: Uuid, update: F) -> Option<ExamSession>
    where
        F: FnOnce(&mut ExamSession),
    {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;
        update(session);
        Some(session.clone())
    }

    /// Replace a session's access code, keeping the code index consistent.
    pub async fn replace_access_code(&self, id: Uuid, new_code: String) -> Option<ExamSession> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&id)?;
        let mut codes = self.codes.write().await;
        codes.remove(&session.access_code);
        codes.insert(new_code.clone(), id);
        session.access_code = new_code;
        Some(session.clone())
    }

    pub async fn insert_attempt(&self, attempt: ExamAttempt) {
        self.attempts.write().await.insert(attempt.id, attempt);
    }

    pub async fn attempt(&self, id: Uuid) -> Option<ExamAttempt> {
        self.attempts.read().await.get(&id).cloned()
    }

    pub async fn session_attempts(&self, session_id: Uuid) -> Vec<ExamAttempt> {
        let mut attempts: Vec<_> = self
            .attempts
            .read()
            .await
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        attempts.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        attempts
    }

    /// Ids and owning sessions of every attempt still marked active.
    pub async fn active_attempts(&self) -> Vec<(Uuid, Uuid)> {
        self.attempts
            .read()
            .await
            .values()
            .filter(|a| a.status == AttemptStatus::Active)
            .map(|a| (a.id, a.session_id))
            .collect()
    }

    /// Append a violation with a server-assigned timestamp. `None` means the
    /// attempt does not exist.
    pub async fn append_violation(
        &self,
        attempt_id: Uuid,
        violation_type: ViolationType,
        description: String,
        details: Option<String>,
    ) -> Option<ViolationAppend> {
        let mut attempts = self.attempts.write().await;
        let attempt = attempts.get_mut(&attempt_id)?;
        if attempt.status != AttemptStatus::Active {
            return Some(ViolationAppend::Ignored {
                status: attempt.status,
            });
        }
        let violation = Violation {
            violation_type,
            description,
            details,
            timestamp: Utc::now(),
            seq: attempt.violations.len() as u32,
        };
        attempt.violations.push(violation.clone());
        Some(ViolationAppend::Appended {
            violation,
            total: attempt.violations.len(),
        })
    }

    /// Move an attempt into a terminal status. Terminal attempts are left
    /// untouched and reported as `AlreadyEnded`.
    pub async fn end_attempt(
        &self,
        attempt_id: Uuid,
        new_status: AttemptStatus,
    ) -> Option<EndOutcome> {
        debug_assert!(new_status.is_terminal());
        let mut attempts = self.attempts.write().await;
        let attempt = attempts.get_mut(&attempt_id)?;
        if attempt.status.is_terminal() {
            return Some(EndOutcome::AlreadyEnded(attempt.clone()));
        }
        attempt.status = new_status;
        attempt.ended_at = Some(Utc::now());
        Some(EndOutcome::Ended(attempt.clone()))
    }
}
