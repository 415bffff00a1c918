use super::{ApiResponse, error_response};
use crate::server::PacerState;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json};
use pacer_core::{BulkDraft, IndividualDraft};
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new()
        .route(
            "/api/v1/pacer/drafts/bulk",
            get(get_bulk_draft).put(put_bulk_draft),
        )
        .route(
            "/api/v1/pacer/drafts/individual",
            get(get_individual_draft).put(put_individual_draft),
        )
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_bulk_draft(Extension(state): Extension<Arc<PacerState>>) -> Json<BulkDraft> {
    Json(state.drafts.load_bulk().await)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn put_bulk_draft(
    Extension(state): Extension<Arc<PacerState>>,
    Json(draft): Json<BulkDraft>,
) -> ApiResponse {
    match state.drafts.save_bulk(&draft).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_individual_draft(
    Extension(state): Extension<Arc<PacerState>>,
) -> Json<IndividualDraft> {
    Json(state.drafts.load_individual().await)
}

#[tracing::instrument(level = "debug", skip_all)]
async fn put_individual_draft(
    Extension(state): Extension<Arc<PacerState>>,
    Json(draft): Json<IndividualDraft>,
) -> ApiResponse {
    match state.drafts.save_individual(&draft).await {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "ok" }))),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")),
    }
}
