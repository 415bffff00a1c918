pub mod bulk;
pub mod drafts;
pub mod health;
pub mod history;

use axum::Json;
use axum::http::StatusCode;
use pacer_core::SchedulerError;

pub fn router() -> axum::Router {
    axum::Router::new()
        .merge(health::router())
        .merge(bulk::router())
        .merge(history::router())
        .merge(drafts::router())
}

pub(crate) type ApiResponse = (StatusCode, Json<serde_json::Value>);

pub(crate) fn error_response(status: StatusCode, error: impl std::fmt::Display) -> ApiResponse {
    (
        status,
        Json(serde_json::json!({ "status": "error", "error": error.to_string() })),
    )
}

pub(crate) fn scheduler_error_response(error: SchedulerError) -> ApiResponse {
    let status = match error {
        SchedulerError::Busy(_) => StatusCode::CONFLICT,
        SchedulerError::EmptyMessage
        | SchedulerError::NoRecipients
        | SchedulerError::InvalidRecipient(_) => StatusCode::BAD_REQUEST,
    };
    error_response(status, error)
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    pub(crate) async fn call(
        router: axum::Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json");
        let body = match body {
            Some(json) => Body::from(json.to_string()),
            None => Body::empty(),
        };
        let response = router
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response json")
        };
        (status, json)
    }
}
