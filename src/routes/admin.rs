use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use uuid::Uuid;

use crate::dto::admin_dto::{CreateSessionRequest, UpdateSessionRequest};
use crate::AppState;

#[axum::debug_handler]
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> crate::error::Result<Response> {
    let session = state.session_service.create_session(req).await?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

#[axum::debug_handler]
pub async fn list_sessions(State(state): State<AppState>) -> crate::error::Result<Response> {
    let sessions = state.session_service.list_sessions().await;
    Ok(Json(sessions).into_response())
}

#[axum::debug_handler]
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let session = state.session_service.get_session(session_id).await?;
    let attempts = state.session_service.session_attempts(session_id).await?;
    Ok(Json(json!({
        "session": session,
        "attempts": attempts,
    }))
    .into_response())
}

#[axum::debug_handler]
pub async fn update_session(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<UpdateSessionRequest>,
) -> crate::error::Result<Response> {
    let session = state
        .session_service
        .update_session(session_id, req)
        .await?;
    Ok(Json(session).into_response())
}

#[axum::debug_handler]
pub async fn regenerate_code(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let session = state.session_service.regenerate_code(session_id).await?;
    Ok(Json(session).into_response())
}

#[axum::debug_handler]
pub async fn session_attempts(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let attempts = state.session_service.session_attempts(session_id).await?;
    Ok(Json(attempts).into_response())
}

#[axum::debug_handler]
pub async fn terminate_attempt(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let attempt = state
        .attempt_service
        .end_attempt(attempt_id, "admin_terminated")
        .await?;
    Ok(Json(attempt).into_response())
}
