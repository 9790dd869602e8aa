pub mod broadcast;
pub mod client;
pub mod config;
pub mod dto;
pub mod error;
pub mod lockdown;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use crate::broadcast::Broadcaster;
use crate::services::{attempt_service::AttemptService, session_service::SessionService};
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub broadcaster: Arc<Broadcaster>,
    pub session_service: SessionService,
    pub attempt_service: AttemptService,
}

impl AppState {
    pub fn new() -> Self {
        let store = Arc::new(Store::new());
        let broadcaster = Arc::new(Broadcaster::new());

        let session_service = SessionService::new(store.clone());
        let attempt_service = AttemptService::new(store.clone(), broadcaster.clone());

        Self {
            store,
            broadcaster,
            session_service,
            attempt_service,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
