use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use examlock::{
    config::{get_config, init_config},
    routes, AppState,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    init_config()?;
    let config = get_config();

    let app_state = AppState::new();

    // Time-expiry sweeper: attempts whose session end time has passed are
    // closed server-side even when the client never phones home.
    {
        let state = app_state.clone();
        let sweep = Duration::from_secs(config.expiry_sweep_seconds.max(1));
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(sweep).await;
                let expired = state.attempt_service.expire_overdue().await;
                if expired > 0 {
                    info!(expired, "expired overdue attempts");
                }
            }
        });
    }

    let base_routes = Router::new().route("/health", get(routes::health::health));

    let student_api = Router::new()
        .route(
            "/api/student/validate-code",
            post(routes::student::validate_code),
        )
        .route(
            "/api/student/start-attempt",
            post(routes::student::start_attempt),
        )
        .route(
            "/api/student/report-violation",
            post(routes::student::report_violation),
        )
        .route(
            "/api/student/end-attempt",
            post(routes::student::end_attempt),
        )
        .route("/api/student/heartbeat", post(routes::student::heartbeat))
        .route(
            "/api/student/attempt/:id/status",
            get(routes::student::attempt_status),
        )
        .layer(axum::middleware::from_fn_with_state(
            examlock::middleware::rate_limit::new_rps_state(config.student_rps),
            examlock::middleware::rate_limit::rps_middleware,
        ));

    let admin_api = Router::new()
        .route(
            "/api/admin/sessions",
            get(routes::admin::list_sessions).post(routes::admin::create_session),
        )
        .route(
            "/api/admin/sessions/:id",
            get(routes::admin::get_session).put(routes::admin::update_session),
        )
        .route(
            "/api/admin/sessions/:id/regenerate-code",
            post(routes::admin::regenerate_code),
        )
        .route(
            "/api/admin/sessions/:id/attempts",
            get(routes::admin::session_attempts),
        )
        .route(
            "/api/admin/attempts/:id/terminate",
            post(routes::admin::terminate_attempt),
        )
        .layer(axum::middleware::from_fn(
            examlock::middleware::auth::require_bearer_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            examlock::middleware::rate_limit::new_rps_state(config.admin_rps),
            examlock::middleware::rate_limit::rps_middleware,
        ));

    let live_api = Router::new().route("/api/live/ws", get(routes::live::ws_handler));

    let app = base_routes
        .merge(student_api)
        .merge(admin_api)
        .merge(live_api)
        .with_state(app_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.server_address.parse()?;
    info!("Server listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
