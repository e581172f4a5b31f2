use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /api/workers: the registered roster and the reviewer in charge.
pub async fn list_workers(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "workers": app.coordinator.registry().list(),
        "reviewer": app.coordinator.reviewer_id(),
        "retry_limit": app.coordinator.policy().retry_limit,
    }))
}
