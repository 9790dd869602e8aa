use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::broadcast::{Broadcaster, LiveEvent};
use crate::dto::student_dto::{
    AttemptInfoResponse, AttemptStatusResponse, SessionInfoResponse, ViolationPayload,
};
use crate::error::{Error, Result};
use crate::models::exam_attempt::{AttemptStatus, ExamAttempt};
use crate::store::{EndOutcome, Store, ViolationAppend};
use crate::utils::code::normalize_code;

#[derive(Clone)]
pub struct AttemptService {
    store: Arc<Store>,
    broadcaster: Arc<Broadcaster>,
}

impl AttemptService {
    pub fn new(store: Arc<Store>, broadcaster: Arc<Broadcaster>) -> Self {
        Self { store, broadcaster }
    }

    /// Resolve an access code to a joinable session. Read-only: validating
    /// the same code twice returns the same result and creates nothing.
    pub async fn redeem_code(&self, code: &str) -> Result<SessionInfoResponse> {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return Err(Error::BadRequest("Access code is required".to_string()));
        }

        let session = self
            .store
            .session_by_code(&normalized)
            .await
            .ok_or_else(|| Error::NotFound("Invalid access code".to_string()))?;

        if !session.is_active {
            return Err(Error::Forbidden(
                "This exam session is not active".to_string(),
            ));
        }
        let now = Utc::now();
        if let Some(start) = session.start_time {
            if now < start {
                return Err(Error::Forbidden(
                    "This exam has not started yet".to_string(),
                ));
            }
        }
        if let Some(end) = session.end_time {
            if now > end {
                return Err(Error::Forbidden("This exam has ended".to_string()));
            }
        }

        Ok(SessionInfoResponse {
            session_id: session.id,
            name: session.name,
            description: session.description,
            allowed_urls: session.allowed_urls,
            start_time: session.start_time,
            end_time: session.end_time,
        })
    }

    pub async fn start_attempt(
        &self,
        session_id: Uuid,
        student_name: Option<String>,
        student_id: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AttemptInfoResponse> {
        let session = self
            .store
            .session(session_id)
            .await
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;
        if !session.is_joinable(Utc::now()) {
            return Err(Error::Forbidden(
                "This exam session is not active".to_string(),
            ));
        }

        let attempt = ExamAttempt::new(
            session_id,
            student_name,
            student_id,
            ip_address,
            user_agent,
        );
        self.store.insert_attempt(attempt.clone()).await;
        tracing::info!(attempt_id = %attempt.id, session_id = %session_id, "attempt started");

        self.broadcaster.publish(
            session_id,
            LiveEvent::StudentJoined {
                session_id,
                attempt_id: attempt.id,
                student_name: attempt.student_name.clone(),
                student_id: attempt.student_id.clone(),
                started_at: attempt.started_at,
            },
        );

        Ok(AttemptInfoResponse {
            attempt_id: attempt.id,
            session_id,
            session_name: session.name,
            allowed_urls: session.allowed_urls,
            started_at: attempt.started_at,
            end_time: session.end_time,
        })
    }

    /// Append a violation with a server-assigned timestamp and broadcast it
    /// with the running count. Reports against an ended attempt are dropped
    /// without error so a racing monitor cannot storm the client with 4xx.
    pub async fn report_violation(
        &self,
        attempt_id: Uuid,
        payload: ViolationPayload,
    ) -> Result<()> {
        let outcome = self
            .store
            .append_violation(
                attempt_id,
                payload.violation_type,
                payload.description,
                payload.details,
            )
            .await
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;

        match outcome {
            ViolationAppend::Appended { violation, total } => {
                let session_id = match self.store.attempt(attempt_id).await {
                    Some(attempt) => attempt.session_id,
                    None => return Ok(()),
                };
                tracing::warn!(
                    %attempt_id,
                    violation = ?violation.violation_type,
                    count = total,
                    "violation recorded"
                );
                self.broadcaster.publish(
                    session_id,
                    LiveEvent::Violation {
                        session_id,
                        attempt_id,
                        violation,
                        violation_count: total,
                    },
                );
            }
            ViolationAppend::Ignored { status } => {
                tracing::debug!(%attempt_id, ?status, "violation report against ended attempt dropped");
            }
        }
        Ok(())
    }

    pub async fn end_attempt(&self, attempt_id: Uuid, reason: &str) -> Result<ExamAttempt> {
        let new_status = match reason {
            "completed" => AttemptStatus::Completed,
            "time_expired" => AttemptStatus::TimeExpired,
            _ => AttemptStatus::Terminated,
        };

        let outcome = self
            .store
            .end_attempt(attempt_id, new_status)
            .await
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;

        let attempt = match outcome {
            EndOutcome::Ended(attempt) => attempt,
            EndOutcome::AlreadyEnded(_) => {
                return Err(Error::Conflict("Attempt already ended".to_string()));
            }
        };

        tracing::info!(%attempt_id, reason, status = ?attempt.status, "attempt ended");
        self.broadcaster.publish(
            attempt.session_id,
            LiveEvent::StudentLeft {
                session_id: attempt.session_id,
                attempt_id,
                status: attempt.status,
                ended_at: attempt.ended_at,
            },
        );
        Ok(attempt)
    }

    /// Liveness signal only: nothing is persisted, observers get a
    /// `student-heartbeat` push.
    pub async fn heartbeat(&self, attempt_id: Uuid) -> Result<()> {
        let attempt = self
            .store
            .attempt(attempt_id)
            .await
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
        self.broadcaster.publish(
            attempt.session_id,
            LiveEvent::StudentHeartbeat {
                session_id: attempt.session_id,
                attempt_id,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    /// Poll fallback for clients that miss a push notification.
    pub async fn status(&self, attempt_id: Uuid) -> Result<AttemptStatusResponse> {
        let attempt = self
            .store
            .attempt(attempt_id)
            .await
            .ok_or_else(|| Error::NotFound("Attempt not found".to_string()))?;
        let session = self.store.session(attempt.session_id).await;

        let now = Utc::now();
        let (session_active, end_time) = match &session {
            Some(s) => (s.is_active && !s.has_ended(now), s.end_time),
            None => (false, None),
        };
        let should_terminate = attempt.status != AttemptStatus::Active || !session_active;

        Ok(AttemptStatusResponse {
            status: attempt.status,
            should_terminate,
            end_time,
        })
    }

    /// End every active attempt whose session end time has passed. Called
    /// from the background sweeper; returns how many attempts were expired.
    pub async fn expire_overdue(&self) -> usize {
        let now = Utc::now();
        let mut expired = 0;
        for (attempt_id, session_id) in self.store.active_attempts().await {
            let Some(session) = self.store.session(session_id).await else {
                continue;
            };
            if !session.has_ended(now) {
                continue;
            }
            match self.end_attempt(attempt_id, "time_expired").await {
                Ok(_) => expired += 1,
                // Lost the race with a student submit or an admin terminate.
                Err(Error::Conflict(_)) => {}
                Err(e) => {
                    tracing::error!(%attempt_id, error = ?e, "failed to expire attempt");
                }
            }
        }
        expired
    }
}
