use crate::traits::PageActuator;
use crate::types::{ActuatorMessage, SendReceipt, TimingHint};
use anyhow::{Result, anyhow};
use reqwest::Url;
use std::time::Duration;

const SUBJECT_SEND_MESSAGE: &str = "MSG_SEND_MESSAGE";
const SUBJECT_PING: &str = "PING";
const DEFAULT_FROM: &str = "pacer";

/// Forwards sends to a page-side bridge (e.g. a content script relay) over HTTP.
///
/// The request body keeps the message envelope the page script already
/// understands: `{ from, subject, data: { messages, delay, humanTyping } }`.
#[derive(Clone)]
pub struct HttpBridgeActuator {
    http: reqwest::Client,
    send_url: String,
    auth_token: Option<String>,
    from: String,
}

impl HttpBridgeActuator {
    pub fn new(send_url: &str) -> Result<Self> {
        let send_url = normalize_http_url(send_url, "bridge_url")?;
        // Simulated typing happens on the page side when the hint is not animated.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            http,
            send_url,
            auth_token: None,
            from: DEFAULT_FROM.to_string(),
        })
    }

    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToOwned::to_owned);
        self
    }

    pub fn with_from(mut self, from: &str) -> Self {
        let from = from.trim();
        if !from.is_empty() {
            self.from = from.to_string();
        }
        self
    }

    fn authorized_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.auth_token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post(&self, payload: &serde_json::Value) -> Result<serde_json::Value> {
        let url = Url::parse(&self.send_url).map_err(|e| anyhow!("invalid bridge_url: {e}"))?;
        let response = self
            .authorized_request(self.http.post(url))
            .json(payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "page bridge request failed: status={} body={}",
                status,
                body
            ));
        }
        Ok(parse_bridge_body(&body))
    }
}

#[async_trait::async_trait]
impl PageActuator for HttpBridgeActuator {
    fn actuator_id(&self) -> &str {
        "http_bridge"
    }

    async fn send(
        &self,
        number: &str,
        message: ActuatorMessage,
        hint: &TimingHint,
    ) -> Result<SendReceipt> {
        let number = number.trim();
        if number.is_empty() {
            return Err(anyhow!("recipient number is required"));
        }
        let content = message.content.trim();
        if content.is_empty() {
            return Err(anyhow!("message content is empty"));
        }

        let payload = send_payload(&self.from, number, content, hint);
        let detail = self.post(&payload).await?;
        if let Some(error) = bridge_reported_error(&detail) {
            return Err(anyhow!("page bridge rejected send to {number}: {error}"));
        }
        tracing::debug!(number, "page bridge accepted message");
        Ok(SendReceipt::now(self.actuator_id(), detail))
    }

    async fn ping(&self) -> Result<()> {
        let payload = serde_json::json!({
            "from": self.from,
            "subject": SUBJECT_PING,
        });
        self.post(&payload).await.map(|_| ())
    }
}

fn send_payload(from: &str, number: &str, content: &str, hint: &TimingHint) -> serde_json::Value {
    serde_json::json!({
        "from": from,
        "subject": SUBJECT_SEND_MESSAGE,
        "data": {
            "messages": [{
                "number": number,
                "message": content,
            }],
            "delay": hint.base_delay_ms,
            "humanTyping": {
                "enabled": true,
                "personality": hint.personality,
                "typingTime": hint.typing_ms,
                "thinkingTime": hint.thinking_ms,
                "animated": hint.animated,
            }
        }
    })
}

fn parse_bridge_body(body: &str) -> serde_json::Value {
    if body.trim().is_empty() {
        return serde_json::Value::Null;
    }
    serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.to_string()))
}

/// A 2xx bridge response may still carry `{ "success": false, "error": ... }`.
fn bridge_reported_error(detail: &serde_json::Value) -> Option<String> {
    let obj = detail.as_object()?;
    if obj.get("success").and_then(|v| v.as_bool()) != Some(false) {
        return None;
    }
    Some(
        obj.get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("unspecified bridge error")
            .to_string(),
    )
}

fn normalize_http_url(raw: &str, field: &str) -> Result<String> {
    let normalized = raw.trim().to_string();
    if normalized.is_empty() {
        return Err(anyhow!("{field} is required"));
    }
    let parsed = Url::parse(&normalized).map_err(|e| anyhow!("invalid {field}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(normalized),
        other => Err(anyhow!("invalid {field} scheme: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        HttpBridgeActuator, bridge_reported_error, normalize_http_url, parse_bridge_body,
        send_payload,
    };
    use crate::types::TimingHint;

    fn hint() -> TimingHint {
        TimingHint {
            personality: "SLOW".to_string(),
            thinking_ms: 900,
            typing_ms: 4200,
            animated: true,
            base_delay_ms: 5000,
        }
    }

    #[test]
    fn normalize_http_url_requires_http_or_https() {
        assert_eq!(
            normalize_http_url("http://127.0.0.1:9100/send", "bridge_url")
                .expect("http url should be valid"),
            "http://127.0.0.1:9100/send"
        );
        assert!(normalize_http_url("ws://127.0.0.1:9100/send", "bridge_url").is_err());
        assert!(normalize_http_url("  ", "bridge_url").is_err());
    }

    #[test]
    fn send_payload_keeps_page_envelope_shape() {
        let payload = send_payload("pacer", "79991234567", "Привет, Анна", &hint());
        assert_eq!(payload["subject"], "MSG_SEND_MESSAGE");
        assert_eq!(payload["data"]["messages"][0]["number"], "79991234567");
        assert_eq!(payload["data"]["messages"][0]["message"], "Привет, Анна");
        assert_eq!(payload["data"]["delay"], 5000);
        assert_eq!(payload["data"]["humanTyping"]["personality"], "SLOW");
        assert_eq!(payload["data"]["humanTyping"]["typingTime"], 4200);
        assert_eq!(payload["data"]["humanTyping"]["thinkingTime"], 900);
        assert_eq!(payload["data"]["humanTyping"]["animated"], true);
    }

    #[test]
    fn bridge_body_errors_are_detected() {
        let ok = parse_bridge_body(r#"{"success": true}"#);
        assert!(bridge_reported_error(&ok).is_none());
        let plain = parse_bridge_body("sent");
        assert!(bridge_reported_error(&plain).is_none());
        let failed = parse_bridge_body(r#"{"success": false, "error": "chat not found"}"#);
        assert_eq!(
            bridge_reported_error(&failed).as_deref(),
            Some("chat not found")
        );
    }

    #[test]
    fn auth_token_and_from_ignore_blank_values() {
        let actuator = HttpBridgeActuator::new("http://localhost:9100/send")
            .expect("valid bridge")
            .with_auth_token(Some("   ".to_string()))
            .with_from(" ");
        assert!(actuator.auth_token.is_none());
        assert_eq!(actuator.from, "pacer");
    }
}
