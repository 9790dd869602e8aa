use std::sync::Once;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;
use uuid::Uuid;

use examlock::dto::admin_dto::CreateSessionRequest;
use examlock::utils::code::format_code;
use examlock::AppState;

fn setup_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        std::env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
        std::env::set_var("JWT_SECRET", "test_secret_key");
        std::env::set_var("STUDENT_RPS", "1000");
        std::env::set_var("ADMIN_RPS", "1000");
        examlock::config::init_config().expect("init config");
    });
}

fn student_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/student/validate-code",
            post(examlock::routes::student::validate_code),
        )
        .route(
            "/api/student/start-attempt",
            post(examlock::routes::student::start_attempt),
        )
        .route(
            "/api/student/report-violation",
            post(examlock::routes::student::report_violation),
        )
        .route(
            "/api/student/end-attempt",
            post(examlock::routes::student::end_attempt),
        )
        .route(
            "/api/student/heartbeat",
            post(examlock::routes::student::heartbeat),
        )
        .route(
            "/api/student/attempt/:id/status",
            get(examlock::routes::student::attempt_status),
        )
        .layer(axum::middleware::from_fn_with_state(
            examlock::middleware::rate_limit::new_rps_state(1000),
            examlock::middleware::rate_limit::rps_middleware,
        ))
        .with_state(state)
}

async fn post_json(app: &Router, uri: &str, body: JsonValue) -> (StatusCode, JsonValue) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, JsonValue) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

fn create_req(end_time: Option<chrono::DateTime<chrono::Utc>>) -> CreateSessionRequest {
    CreateSessionRequest {
        name: "Algorithms final".into(),
        description: Some("Closed book".into()),
        allowed_urls: vec!["https://exam.example.com".into()],
        start_time: None,
        end_time,
    }
}

#[tokio::test]
async fn student_flow_end_to_end() {
    setup_env();
    let state = AppState::new();
    let session = state
        .session_service
        .create_session(create_req(None))
        .await
        .expect("session");
    let app = student_router(state.clone());

    // redeem with the display form of the code (separator + lowercase)
    let display_code = format_code(&session.access_code).to_lowercase();
    let (status, body) = post_json(
        &app,
        "/api/student/validate-code",
        json!({ "code": display_code.as_str() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sessionId"], json!(session.id));
    assert_eq!(body["allowedUrls"][0], "https://exam.example.com");

    // redemption is read-only and repeatable
    let (status2, body2) = post_json(
        &app,
        "/api/student/validate-code",
        json!({ "code": display_code.as_str() }),
    )
    .await;
    assert_eq!(status2, StatusCode::OK);
    assert_eq!(body, body2);
    assert!(state
        .store
        .session_attempts(session.id)
        .await
        .is_empty());

    let (status, attempt) = post_json(
        &app,
        "/api/student/start-attempt",
        json!({ "sessionId": session.id, "studentName": "Alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let attempt_id: Uuid = attempt["attemptId"].as_str().unwrap().parse().unwrap();
    assert_eq!(attempt["sessionName"], "Algorithms final");

    let (status, body) = post_json(
        &app,
        "/api/student/report-violation",
        json!({
            "attemptId": attempt_id,
            "violation": {
                "type": "focus_lost",
                "description": "Exam window lost focus"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Violation reported");

    let (status, body) = post_json(
        &app,
        "/api/student/end-attempt",
        json!({ "attemptId": attempt_id, "reason": "completed" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attempt"]["status"], "completed");
    assert_eq!(body["attempt"]["violations"].as_array().unwrap().len(), 1);
    assert_eq!(body["attempt"]["violations"][0]["type"], "focus_lost");

    // double-ending is refused and endedAt stays put
    let ended_at = body["attempt"]["endedAt"].clone();
    let (status, _) = post_json(
        &app,
        "/api/student/end-attempt",
        json!({ "attemptId": attempt_id, "reason": "terminated" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    let stored = state.store.attempt(attempt_id).await.unwrap();
    assert_eq!(json!(stored.ended_at), ended_at);

    let (status, body) = get_json(
        &app,
        &format!("/api/student/attempt/{}/status", attempt_id),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["shouldTerminate"], true);
}

#[tokio::test]
async fn redemption_gates_on_session_window_and_activity() {
    setup_env();
    let state = AppState::new();
    let app = student_router(state.clone());

    // unknown code
    let (status, body) =
        post_json(&app, "/api/student/validate-code", json!({ "code": "QQQQQQ" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Invalid access code");

    // ended session: no redemption, no attempts
    let ended = state
        .session_service
        .create_session(create_req(Some(chrono::Utc::now() - chrono::Duration::hours(1))))
        .await
        .unwrap();
    let (status, body) = post_json(
        &app,
        "/api/student/validate-code",
        json!({ "code": ended.access_code }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "This exam has ended");

    let (status, _) = post_json(
        &app,
        "/api/student/start-attempt",
        json!({ "sessionId": ended.id }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // not started yet
    let mut req = create_req(None);
    req.start_time = Some(chrono::Utc::now() + chrono::Duration::hours(1));
    let upcoming = state.session_service.create_session(req).await.unwrap();
    let (status, body) = post_json(
        &app,
        "/api/student/validate-code",
        json!({ "code": upcoming.access_code }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "This exam has not started yet");

    // deactivated
    let session = state
        .session_service
        .create_session(create_req(None))
        .await
        .unwrap();
    state
        .session_service
        .update_session(
            session.id,
            examlock::dto::admin_dto::UpdateSessionRequest {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let (status, body) = post_json(
        &app,
        "/api/student/validate-code",
        json!({ "code": session.access_code }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "This exam session is not active");
}

#[tokio::test]
async fn unknown_attempts_yield_not_found() {
    setup_env();
    let state = AppState::new();
    let app = student_router(state);
    let ghost = Uuid::new_v4();

    let (status, _) = post_json(
        &app,
        "/api/student/report-violation",
        json!({
            "attemptId": ghost,
            "violation": { "type": "app_opened", "description": "x" }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json(
        &app,
        "/api/student/heartbeat",
        json!({ "attemptId": ghost }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get_json(&app, &format!("/api/student/attempt/{}/status", ghost)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_reports_all_land_in_receipt_order() {
    setup_env();
    let state = AppState::new();
    let session = state
        .session_service
        .create_session(create_req(None))
        .await
        .unwrap();
    let attempt = state
        .attempt_service
        .start_attempt(session.id, None, None, None, None)
        .await
        .unwrap();

    let mut joins = Vec::new();
    for i in 0..20 {
        let svc = state.attempt_service.clone();
        let attempt_id = attempt.attempt_id;
        joins.push(tokio::spawn(async move {
            svc.report_violation(
                attempt_id,
                examlock::dto::student_dto::ViolationPayload {
                    violation_type: examlock::models::exam_attempt::ViolationType::AppOpened,
                    description: format!("report {}", i),
                    details: Some(format!("app-{}", i)),
                },
            )
            .await
        }));
    }
    for join in joins {
        join.await.unwrap().unwrap();
    }

    let stored = state.store.attempt(attempt.attempt_id).await.unwrap();
    assert_eq!(stored.violations.len(), 20);
    for (i, violation) in stored.violations.iter().enumerate() {
        assert_eq!(violation.seq, i as u32);
    }
    for pair in stored.violations.windows(2) {
        assert!(pair[0].timestamp <= pair[1].timestamp);
    }
}

#[tokio::test]
async fn api_client_round_trips_against_a_live_server() {
    setup_env();
    let state = AppState::new();
    let session = state
        .session_service
        .create_session(create_req(None))
        .await
        .unwrap();
    let app = student_router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api =
        examlock::client::api::StudentApiClient::new(format!("http://{}", addr)).unwrap();

    let info = api.validate_code(&session.access_code).await.unwrap();
    assert_eq!(info.session_id, session.id);

    let attempt = api
        .start_attempt(session.id, Some("Bob"), None)
        .await
        .unwrap();

    api.report_violation(
        attempt.attempt_id,
        &examlock::lockdown::ViolationReport::new(
            examlock::models::exam_attempt::ViolationType::ShortcutBlocked,
            "Blocked shortcut: Alt+Tab",
            Some("Alt+Tab".into()),
        ),
    )
    .await
    .unwrap();

    api.heartbeat(attempt.attempt_id).await.unwrap();

    let status = api.check_status(attempt.attempt_id).await.unwrap();
    assert!(!status.should_terminate);

    let ended = api.end_attempt(attempt.attempt_id, "completed").await.unwrap();
    assert_eq!(ended.attempt.violations.len(), 1);

    let err = api
        .end_attempt(attempt.attempt_id, "completed")
        .await
        .unwrap_err();
    assert!(matches!(err, examlock::error::Error::Conflict(_)));
}
