//! Shared application state for the health endpoints.

use std::sync::Arc;

use async_nats::connection::State as ConnectionState;

use crate::config::AppConfig;
use crate::db::DbPool;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<AppConfig>,
    pub nats: async_nats::Client,
    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig, nats: async_nats::Client) -> Self {
        Self {
            db,
            config: Arc::new(config),
            nats,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn nats_connected(&self) -> bool {
        self.nats.connection_state() == ConnectionState::Connected
    }
}
