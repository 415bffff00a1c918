use crate::server::PacerState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pacer/health", get(get_health))
        .route("/api/v1/pacer/status", get(get_status))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_health(Extension(state): Extension<Arc<PacerState>>) -> Json<serde_json::Value> {
    let bulk = state.scheduler.status();
    Json(serde_json::json!({
        "status": "ok",
        "ready": true,
        "checked_at": Utc::now(),
        "checks": {
            "actuator": state.scheduler.actuator_id(),
            "bulk_state": bulk.state,
            "variation_enabled": state.config.variation.enabled,
            "variation_available": state.variation.available,
        }
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_status(Extension(state): Extension<Arc<PacerState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "bulk": state.scheduler.status(),
        "individual": state.scheduler.individual_status(),
        "last_job": state.jobs.last_bulk().await,
        "last_individual": state.jobs.last_individual().await,
    }))
}
