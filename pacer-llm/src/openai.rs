use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ChatResponse, GenerationParams, Role, Usage};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct ChatCompletionsClient {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsClient {
    pub fn new(http: reqwest::Client, url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http,
            url: url.to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    #[tracing::instrument(level = "info", skip_all, fields(model = %self.model))]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<ChatResponse> {
        let req = ChatCompletionsRequest::new(&self.model, messages, params);

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(LlmError::Http(format!(
                "chat completions status={status} body={body}"
            )));
        }

        let parsed: ChatCompletionsResponse = serde_json::from_str(&body)?;
        parsed.try_into()
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

impl ChatCompletionsRequest {
    fn new(model: &str, messages: &[ChatMessage], params: GenerationParams) -> Self {
        Self {
            model: model.to_string(),
            messages: messages.iter().map(to_wire_message).collect(),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: String,
}

fn to_wire_message(m: &ChatMessage) -> WireMessage {
    let role = match m.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    WireMessage {
        role: role.to_string(),
        content: m.content.clone(),
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionsResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

impl TryFrom<ChatCompletionsResponse> for ChatResponse {
    type Error = LlmError;

    fn try_from(v: ChatCompletionsResponse) -> Result<Self> {
        let choice = v.choices.into_iter().next().ok_or_else(|| {
            LlmError::ResponseFormat("chat completions response missing choices".to_string())
        })?;

        let usage = v.usage.unwrap_or(WireUsage {
            prompt_tokens: 0,
            completion_tokens: 0,
        });

        Ok(ChatResponse {
            message: ChatMessage {
                role: Role::Assistant,
                content: choice.message.content.unwrap_or_default(),
            },
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            },
            finish_reason: choice
                .finish_reason
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }
}
