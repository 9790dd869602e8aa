use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use uuid::Uuid;
use validator::Validate;

use crate::dto::student_dto::{
    EndAttemptRequest, EndAttemptResponse, HeartbeatRequest, MessageResponse,
    ReportViolationRequest, StartAttemptRequest, ValidateCodeRequest,
};
use crate::AppState;

#[axum::debug_handler]
pub async fn validate_code(
    State(state): State<AppState>,
    Json(req): Json<ValidateCodeRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let info = state.attempt_service.redeem_code(&req.code).await?;
    Ok(Json(info).into_response())
}

#[axum::debug_handler]
pub async fn start_attempt(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<StartAttemptRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;

    let ip_address = connect_info.map(|ConnectInfo(addr)| addr.ip().to_string());
    let user_agent = headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let info = state
        .attempt_service
        .start_attempt(
            req.session_id,
            req.student_name,
            req.student_id,
            ip_address,
            user_agent,
        )
        .await?;
    Ok((axum::http::StatusCode::CREATED, Json(info)).into_response())
}

#[axum::debug_handler]
pub async fn report_violation(
    State(state): State<AppState>,
    Json(req): Json<ReportViolationRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    state
        .attempt_service
        .report_violation(req.attempt_id, req.violation)
        .await?;
    Ok(Json(MessageResponse {
        message: "Violation reported".to_string(),
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn end_attempt(
    State(state): State<AppState>,
    Json(req): Json<EndAttemptRequest>,
) -> crate::error::Result<Response> {
    req.validate()?;
    let attempt = state
        .attempt_service
        .end_attempt(req.attempt_id, &req.reason)
        .await?;
    Ok(Json(EndAttemptResponse {
        message: "Attempt ended".to_string(),
        attempt,
    })
    .into_response())
}

#[axum::debug_handler]
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> crate::error::Result<Response> {
    state.attempt_service.heartbeat(req.attempt_id).await?;
    Ok(Json(serde_json::json!({ "status": "ok" })).into_response())
}

#[axum::debug_handler]
pub async fn attempt_status(
    State(state): State<AppState>,
    Path(attempt_id): Path<Uuid>,
) -> crate::error::Result<Response> {
    let status = state.attempt_service.status(attempt_id).await?;
    Ok(Json(status).into_response())
}
