use std::sync::Arc;

use chrono::Utc;
use url::Url;
use uuid::Uuid;
use validator::Validate;

use crate::dto::admin_dto::{CreateSessionRequest, UpdateSessionRequest};
use crate::error::{Error, Result};
use crate::models::exam_attempt::ExamAttempt;
use crate::models::exam_session::ExamSession;
use crate::store::Store;
use crate::utils::code::generate_access_code;

#[derive(Clone)]
pub struct SessionService {
    store: Arc<Store>,
}

impl SessionService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn create_session(&self, req: CreateSessionRequest) -> Result<ExamSession> {
        req.validate()?;
        validate_urls(&req.allowed_urls)?;
        if let (Some(start), Some(end)) = (req.start_time, req.end_time) {
            if end <= start {
                return Err(Error::BadRequest(
                    "End time must be after start time".to_string(),
                ));
            }
        }

        let access_code = self.unique_access_code().await;
        let session = ExamSession {
            id: Uuid::new_v4(),
            name: req.name,
            description: req.description,
            allowed_urls: req.allowed_urls,
            access_code,
            is_active: true,
            start_time: req.start_time,
            end_time: req.end_time,
            created_at: Utc::now(),
        };
        self.store.insert_session(session.clone()).await;
        tracing::info!(session_id = %session.id, name = %session.name, "exam session created");
        Ok(session)
    }

    pub async fn update_session(
        &self,
        session_id: Uuid,
        req: UpdateSessionRequest,
    ) -> Result<ExamSession> {
        req.validate()?;
        if let Some(ref urls) = req.allowed_urls {
            validate_urls(urls)?;
        }
        if let (Some(start), Some(end)) = (req.start_time, req.end_time) {
            if end <= start {
                return Err(Error::BadRequest(
                    "End time must be after start time".to_string(),
                ));
            }
        }

        self.store
            .update_session(session_id, |session| {
                if let Some(name) = req.name {
                    session.name = name;
                }
                if let Some(description) = req.description {
                    session.description = Some(description);
                }
                if let Some(urls) = req.allowed_urls {
                    session.allowed_urls = urls;
                }
                if let Some(is_active) = req.is_active {
                    session.is_active = is_active;
                }
                if let Some(start) = req.start_time {
                    session.start_time = Some(start);
                }
                if let Some(end) = req.end_time {
                    session.end_time = Some(end);
                }
            })
            .await
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))
    }

    pub async fn regenerate_code(&self, session_id: Uuid) -> Result<ExamSession> {
        let code = self.unique_access_code().await;
        self.store
            .replace_access_code(session_id, code)
            .await
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))
    }

    pub async fn get_session(&self, session_id: Uuid) -> Result<ExamSession> {
        self.store
            .session(session_id)
            .await
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))
    }

    pub async fn list_sessions(&self) -> Vec<ExamSession> {
        self.store.list_sessions().await
    }

    pub async fn session_attempts(&self, session_id: Uuid) -> Result<Vec<ExamAttempt>> {
        self.get_session(session_id).await?;
        Ok(self.store.session_attempts(session_id).await)
    }

    async fn unique_access_code(&self) -> String {
        loop {
            let code = generate_access_code();
            if !self.store.code_in_use(&code).await {
                return code;
            }
        }
    }
}

fn validate_urls(urls: &[String]) -> Result<()> {
    for raw in urls {
        let url = Url::parse(raw)
            .map_err(|_| Error::BadRequest(format!("Invalid URL: {}", raw)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::BadRequest(format!(
                "Only HTTP and HTTPS URLs are allowed: {}",
                raw
            )));
        }
    }
    Ok(())
}
