//! Health check handler.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::{extract::State, Json};
use std::sync::Arc;

/// Handler for GET /v1/health
///
/// Liveness probe with occupancy. State is in-process, so a responding
/// service is a healthy one; room and connection counts come from the
/// actor metrics without messaging the actor.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let metrics = state.rooms.metrics();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        room_count: metrics.active_rooms(),
        connection_count: metrics.active_connections(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::collections::HashMap;

    #[tokio::test]
    async fn test_health_check_reports_version_and_occupancy() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        let state = Arc::new(AppState::new(config));

        let Json(response) = health_check(State(state)).await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(response.room_count, 0);
        assert_eq!(response.connection_count, 0);
    }
}
