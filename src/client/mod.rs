//! Client runtime around the lockdown stack: configuration, the HTTP
//! reporting path, and the periodic heartbeat / status-poll loops.

pub mod api;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lockdown::controller::{EndReason, LockdownController};

use api::StudentApiClient;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_url: String,
    pub admin_exit_password: String,
    /// Optional JSON override for the built-in lockdown policy.
    pub policy_path: Option<String>,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            server_url: std::env::var("SERVER_URL")
                .map_err(|_| Error::Config("Missing environment variable: SERVER_URL".into()))?,
            admin_exit_password: std::env::var("ADMIN_EXIT_PASSWORD").map_err(|_| {
                Error::Config("Missing environment variable: ADMIN_EXIT_PASSWORD".into())
            })?,
            policy_path: std::env::var("LOCKDOWN_POLICY_PATH").ok(),
        })
    }
}

/// Periodic liveness signal to the server (~30s). Stops with the lockdown.
pub fn spawn_heartbeat(
    api: Arc<StudentApiClient>,
    controller: Arc<LockdownController>,
    attempt_id: Uuid,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await; // the first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if !controller.is_live() {
                break;
            }
            if let Err(e) = api.heartbeat(attempt_id).await {
                tracing::debug!(error = %e, "heartbeat failed; will retry next tick");
            }
        }
    })
}

/// Poll-based fallback for missed push notifications: when the server says
/// the attempt should terminate, the lockdown is torn down locally.
pub fn spawn_status_watch(
    api: Arc<StudentApiClient>,
    controller: Arc<LockdownController>,
    attempt_id: Uuid,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !controller.is_live() {
                break;
            }
            let status = match api.check_status(attempt_id).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!(error = %e, "status poll failed; will retry next tick");
                    continue;
                }
            };
            if status.should_terminate {
                tracing::warn!(%attempt_id, "server requested termination");
                match api.end_attempt(attempt_id, "terminated").await {
                    Ok(_) | Err(Error::Conflict(_)) => {}
                    Err(e) => tracing::debug!(error = %e, "end-attempt report failed"),
                }
                if let Err(e) = controller.end(EndReason::Terminated).await {
                    tracing::error!(error = ?e, "failed to end lockdown after termination");
                }
                break;
            }
        }
    })
}
