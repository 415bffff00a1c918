use crate::server::PacerState;
use axum::routing::{get, post};
use axum::{Extension, Json};
use chrono::Utc;
use pacer_core::{check, parse_recipients};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CheckRequest {
    recipients_text: String,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pacer/check", post(check_recipients))
        .route(
            "/api/v1/pacer/history",
            get(list_history).delete(clear_history),
        )
}

/// Recency report for a pasted list, plus the list with recent contacts removed.
#[tracing::instrument(level = "info", skip_all)]
async fn check_recipients(
    Extension(state): Extension<Arc<PacerState>>,
    Json(req): Json<CheckRequest>,
) -> Json<serde_json::Value> {
    let parsed = parse_recipients(&req.recipients_text);
    let report = check(&state.history, parsed.recipients, Utc::now()).await;
    Json(serde_json::json!({
        "status": "ok",
        "remaining_text": report.remaining_text(),
        "all_ready": report.all_ready(),
        "rejected_lines": parsed.rejected,
        "report": report,
    }))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn list_history(Extension(state): Extension<Arc<PacerState>>) -> Json<serde_json::Value> {
    let entries = state.history.get_all().await;
    Json(serde_json::json!({
        "retention_days": state.history.retention().num_days(),
        "count": entries.len(),
        "entries": entries,
    }))
}

#[tracing::instrument(level = "info", skip_all)]
async fn clear_history(Extension(state): Extension<Arc<PacerState>>) -> Json<serde_json::Value> {
    state.history.clear().await;
    tracing::info!("contact history cleared");
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use crate::routes::test_support::call;
    use crate::server::app_router;
    use crate::server::tests::{RecordingActuator, test_state};
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use pacer_core::RecipientNumber;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn check_returns_remaining_text() {
        let state = test_state(Arc::new(RecordingActuator::default()));
        let recent = RecipientNumber::parse("79990000002").expect("number");
        state
            .history
            .record(&recent, "earlier", Utc::now() - Duration::hours(12))
            .await;

        let (status, body) = call(
            app_router(state),
            "POST",
            "/api/v1/pacer/check",
            Some(json!({ "recipients_text": "79990000001,A\n+79990000002,B\nxx\n79990000003,C" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["remaining_text"], "79990000001,A\n79990000003,C");
        assert_eq!(body["all_ready"], false);
        assert_eq!(body["rejected_lines"], json!(["xx"]));
        assert_eq!(body["report"]["total"], 3);
        assert_eq!(
            body["report"]["recently_contacted"][0]["recipient"]["number"],
            "79990000002"
        );
    }

    #[tokio::test]
    async fn history_lists_and_clears() {
        let state = test_state(Arc::new(RecordingActuator::default()));
        let number = RecipientNumber::parse("79990000001").expect("number");
        state.history.record(&number, "hello", Utc::now()).await;

        let (_, body) = call(app_router(state.clone()), "GET", "/api/v1/pacer/history", None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["retention_days"], 3);
        assert_eq!(body["entries"]["79990000001"]["count"], 1);
        assert_eq!(body["entries"]["79990000001"]["message"], "hello");

        let (status, _) =
            call(app_router(state.clone()), "DELETE", "/api/v1/pacer/history", None).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(app_router(state), "GET", "/api/v1/pacer/history", None).await;
        assert_eq!(body["count"], 0);
    }
}
