use super::{ApiResponse, error_response, scheduler_error_response};
use crate::server::PacerState;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Extension, Json};
use chrono::Utc;
use pacer_core::{RecencyPolicy, SchedulerError, SendJob, apply_policy, parse_recipients};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BulkRequest {
    #[serde(default)]
    lines: Vec<String>,
    #[serde(default)]
    recipients_text: Option<String>,
    message: String,
    #[serde(default)]
    vary: Option<bool>,
    #[serde(default)]
    base_delay_ms: Option<u64>,
    #[serde(default)]
    enforce_recency: Option<bool>,
}

impl BulkRequest {
    fn recipients_input(&self) -> String {
        let mut input = self.lines.join("\n");
        if let Some(text) = self.recipients_text.as_deref() {
            if !input.is_empty() {
                input.push('\n');
            }
            input.push_str(text);
        }
        input
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IndividualRequest {
    number: String,
    message: String,
    #[serde(default)]
    vary: Option<bool>,
}

pub fn router() -> axum::Router {
    axum::Router::new()
        .route("/api/v1/pacer/bulk", post(start_bulk))
        .route("/api/v1/pacer/bulk/stop", post(stop_bulk))
        .route("/api/v1/pacer/individual", post(send_individual))
        .route("/api/v1/pacer/individual/stop", post(stop_individual))
}

#[tracing::instrument(level = "info", skip_all)]
async fn start_bulk(
    Extension(state): Extension<Arc<PacerState>>,
    Json(req): Json<BulkRequest>,
) -> ApiResponse {
    if req.message.trim().is_empty() {
        return scheduler_error_response(SchedulerError::EmptyMessage);
    }
    let vary = match state.variation.resolve(req.vary) {
        Ok(vary) => vary,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{e:#}")),
    };
    let parsed = parse_recipients(&req.recipients_input());
    let policy = match req.enforce_recency {
        Some(true) => RecencyPolicy::Enforce,
        Some(false) => RecencyPolicy::Advisory,
        None => state.config.pacing.recency_policy,
    };
    let split = apply_policy(policy, &state.history, parsed.recipients, Utc::now()).await;
    let skipped: Vec<String> = split.skipped.iter().map(|r| r.number.to_string()).collect();

    let mut options = state.config.send_options(vary);
    if let Some(base_delay_ms) = req.base_delay_ms {
        options.base_delay_ms = base_delay_ms;
    }
    let total = split.eligible.len();
    let job = SendJob::new(split.eligible, req.message).with_options(options);
    let handle = match state.scheduler.start_bulk(job) {
        Ok(handle) => handle,
        Err(error) => {
            tracing::warn!(%error, skipped = skipped.len(), "bulk job rejected");
            let (status, Json(mut body)) = scheduler_error_response(error);
            body["skipped"] = serde_json::json!(skipped);
            body["rejected_lines"] = serde_json::json!(parsed.rejected);
            return (status, Json(body));
        }
    };

    let job_id = Uuid::new_v4();
    state.jobs.begin(job_id, skipped.len()).await;
    tracing::info!(%job_id, total, skipped = skipped.len(), "bulk job started");
    let watcher_state = state.clone();
    let watcher = tokio::spawn(async move {
        let summary = handle.wait().await;
        tracing::info!(%job_id, state = ?summary.state, sent = summary.sent, "bulk job finished");
        watcher_state.jobs.complete(job_id, summary).await;
    });
    state.jobs.watch(watcher).await;

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "status": "started",
            "job_id": job_id,
            "total": total,
            "skipped": skipped,
            "rejected_lines": parsed.rejected,
        })),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn stop_bulk(Extension(state): Extension<Arc<PacerState>>) -> Json<serde_json::Value> {
    let stopped = state.scheduler.stop_bulk();
    Json(serde_json::json!({ "status": "ok", "stopped": stopped }))
}

/// Validates and claims the individual slot synchronously, then types and
/// sends in the background.
#[tracing::instrument(level = "info", skip_all)]
async fn send_individual(
    Extension(state): Extension<Arc<PacerState>>,
    Json(req): Json<IndividualRequest>,
) -> ApiResponse {
    let vary = match state.variation.resolve(req.vary) {
        Ok(vary) => vary,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("{e:#}")),
    };
    let options = state.config.send_options(vary);
    let handle = match state
        .scheduler
        .start_individual(&req.number, &req.message, options)
    {
        Ok(handle) => handle,
        Err(error) => {
            tracing::warn!(%error, "individual send rejected");
            return scheduler_error_response(error);
        }
    };

    let number = handle.number().clone();
    let watcher_state = state.clone();
    let watcher = tokio::spawn(async move {
        let result = handle.wait().await;
        tracing::info!(number = %result.number, outcome = ?result.outcome, "individual send finished");
        watcher_state.jobs.record_individual(result).await;
    });
    state.jobs.watch(watcher).await;

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "started", "number": number })),
    )
}

#[tracing::instrument(level = "info", skip_all)]
async fn stop_individual(Extension(state): Extension<Arc<PacerState>>) -> Json<serde_json::Value> {
    let stopped = state.scheduler.stop_individual();
    Json(serde_json::json!({ "status": "ok", "stopped": stopped }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::call;
    use crate::server::app_router;
    use crate::server::tests::{RecordingActuator, test_state};
    use pacer_core::{JobState, RecipientNumber};
    use serde_json::json;
    use std::time::Duration;

    async fn wait_for_bulk(state: &Arc<PacerState>) -> pacer_core::JobSummary {
        for _ in 0..200 {
            if let Some(summary) = state.jobs.last_bulk().await.and_then(|job| job.summary) {
                return summary;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("bulk job did not finish");
    }

    #[test]
    fn recipients_input_joins_lines_and_text() {
        let req = BulkRequest {
            lines: vec!["79990000001,A".to_string()],
            recipients_text: Some("79990000002,B".to_string()),
            message: "hi".to_string(),
            vary: None,
            base_delay_ms: None,
            enforce_recency: None,
        };
        assert_eq!(req.recipients_input(), "79990000001,A\n79990000002,B");
    }

    #[tokio::test]
    async fn bulk_job_runs_and_reports_summary() {
        let actuator = Arc::new(RecordingActuator::default());
        let state = test_state(actuator.clone());
        let (status, body) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/bulk",
            Some(json!({
                "recipients_text": "79990000001,Анна\n12\n79990000002,Борис",
                "message": "Привет, @valueOne",
                "vary": false
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["total"], 2);
        assert_eq!(body["rejected_lines"], json!(["12"]));

        let summary = wait_for_bulk(&state).await;
        assert_eq!(summary.state, JobState::Completed);
        assert_eq!(summary.sent, 2);
        assert_eq!(
            *actuator.numbers.lock().expect("numbers lock"),
            vec!["79990000001", "79990000002"]
        );
    }

    #[tokio::test]
    async fn enforced_recency_strips_recent_contacts() {
        let actuator = Arc::new(RecordingActuator::default());
        let state = test_state(actuator);
        let recent = RecipientNumber::parse("79990000001").expect("number");
        state.history.record(&recent, "earlier", Utc::now()).await;

        let (status, body) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/bulk",
            Some(json!({
                "lines": ["+7 999 000 00 01", "79990000002"],
                "message": "hi",
                "enforce_recency": true
            })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["total"], 1);
        assert_eq!(body["skipped"], json!(["79990000001"]));
        wait_for_bulk(&state).await;
    }

    #[tokio::test]
    async fn bulk_rejects_empty_message_and_empty_list() {
        let state = test_state(Arc::new(RecordingActuator::default()));
        let (status, body) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/bulk",
            Some(json!({ "lines": ["79990000001"], "message": "  " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (status, _) = call(
            app_router(state),
            "POST",
            "/api/v1/pacer/bulk",
            Some(json!({ "lines": ["abc"], "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn individual_send_validates_then_runs() {
        let actuator = Arc::new(RecordingActuator::default());
        let state = test_state(actuator.clone());
        let (status, _) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/individual",
            Some(json!({ "number": "12", "message": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/individual",
            Some(json!({ "number": "+7 999 000-00-09", "message": "Добрый день" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["number"], "79990000009");

        for _ in 0..200 {
            if state.jobs.last_individual().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let result = state.jobs.last_individual().await.expect("individual result");
        assert!(result.is_sent());
    }

    #[tokio::test]
    async fn stop_without_running_job_reports_false() {
        let state = test_state(Arc::new(RecordingActuator::default()));
        let (status, body) = call(app_router(state), "POST", "/api/v1/pacer/bulk/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stopped"], false);
    }

    #[tokio::test]
    async fn second_individual_send_is_rejected_while_first_runs() {
        let actuator = Arc::new(RecordingActuator::slow(Duration::from_millis(300)));
        let state = test_state(actuator.clone());
        let (status, _) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/individual",
            Some(json!({ "number": "79990000001", "message": "первое" })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let (status, body) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/individual",
            Some(json!({ "number": "79990000002", "message": "второе" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["status"], "error");

        state.jobs.drain().await;
        assert_eq!(
            *actuator.numbers.lock().expect("numbers lock"),
            vec!["79990000001"]
        );
    }

    #[tokio::test]
    async fn vary_without_rephraser_is_rejected() {
        let actuator = Arc::new(RecordingActuator::default());
        let state = test_state(actuator.clone());
        let (status, body) = call(
            app_router(state.clone()),
            "POST",
            "/api/v1/pacer/bulk",
            Some(json!({ "lines": ["79990000001"], "message": "hi", "vary": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["error"]
                .as_str()
                .expect("error text")
                .contains("variation")
        );

        let (status, _) = call(
            app_router(state),
            "POST",
            "/api/v1/pacer/individual",
            Some(json!({ "number": "79990000001", "message": "hi", "vary": true })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(actuator.numbers.lock().expect("numbers lock").is_empty());
    }
}
