//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::db::health_check as db_health_check;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    /// Health status ("ok" or "unhealthy")
    pub status: String,
}

/// Detailed health check response for the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    pub status: String,
    pub server: String,
    pub database: String,
    pub nats: String,
    pub uptime_seconds: u64,
    pub version: String,
}

/// `GET /health`
///
/// Liveness only; suitable for load balancer checks.
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// `GET /api/health`
///
/// Returns `503 Service Unavailable` when PostgreSQL or NATS is unreachable.
pub async fn api_health(State(state): State<AppState>) -> (StatusCode, Json<ApiHealthResponse>) {
    let db_healthy = db_health_check(&state.db).await;
    let nats_healthy = state.nats_connected();
    let healthy = db_healthy && nats_healthy;

    let describe = |up: bool| if up { "connected" } else { "disconnected" }.to_string();
    let response = ApiHealthResponse {
        status: if healthy { "ok" } else { "unhealthy" }.to_string(),
        server: state.config.server_name.clone(),
        database: describe(db_healthy),
        nats: describe(nats_healthy),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check() {
        let response = tokio_test::block_on(health_check());
        assert_eq!(response.status, "ok");
    }
}
