use crate::traits::PageActuator;
use crate::types::{ActuatorMessage, SendReceipt, TimingHint};
use anyhow::{Result, anyhow};
use reqwest::Url;
use std::time::Duration;

/// Sends through the WhatsApp Cloud API instead of a page bridge.
///
/// The Graph API sends instantly, so it does not render typing.
#[derive(Clone)]
pub struct WhatsAppCloudActuator {
    http: reqwest::Client,
    access_token: String,
    phone_number_id: String,
}

impl WhatsAppCloudActuator {
    pub fn new(access_token: &str, phone_number_id: &str) -> Result<Self> {
        let access_token = access_token.trim();
        if access_token.is_empty() {
            return Err(anyhow!("whatsapp access token is required"));
        }
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(anyhow!("whatsapp phone number id is required"));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            access_token: access_token.to_string(),
            phone_number_id: phone_number_id.to_string(),
        })
    }

    fn messages_url(&self) -> Result<Url> {
        Url::parse(&format!(
            "https://graph.facebook.com/v20.0/{}/messages",
            self.phone_number_id
        ))
        .map_err(|e| anyhow!("invalid whatsapp graph API URL: {e}"))
    }
}

#[async_trait::async_trait]
impl PageActuator for WhatsAppCloudActuator {
    fn actuator_id(&self) -> &str {
        "whatsapp_cloud"
    }

    fn renders_typing(&self) -> bool {
        false
    }

    async fn send(
        &self,
        number: &str,
        message: ActuatorMessage,
        _hint: &TimingHint,
    ) -> Result<SendReceipt> {
        let to = number.trim();
        if to.is_empty() {
            return Err(anyhow!("recipient number (E.164 digits) is required"));
        }
        let text = message.content.trim();
        if text.is_empty() {
            return Err(anyhow!("message content is empty"));
        }

        let url = self.messages_url()?;
        let payload = text_message_payload(to, text);

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(anyhow!(
                "whatsapp send failed: status={} body={}",
                status,
                body
            ));
        }

        let detail = serde_json::from_str(&body).unwrap_or(serde_json::Value::Null);
        Ok(SendReceipt::now(self.actuator_id(), detail))
    }
}

fn text_message_payload(to: &str, text: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": text,
        }
    })
}
