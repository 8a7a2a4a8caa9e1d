use axum::extract::State;

use crate::health::HealthResponse;
use crate::state::AppState;

/// Report dependency health; 503 when any dependency is down
pub async fn health(State(state): State<AppState>) -> HealthResponse {
    state.health.check_health().await
}
