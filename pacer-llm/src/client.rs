use crate::error::{LlmError, Result};
use crate::openai::ChatCompletionsClient;
use crate::types::{ChatMessage, ChatResponse, GenerationParams};

const OPENAI_CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const MISTRAL_CHAT_COMPLETIONS_URL: &str = "https://api.mistral.ai/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    OpenAI,
    Mistral,
}

impl Provider {
    pub fn default_url(self) -> &'static str {
        match self {
            Provider::OpenAI => OPENAI_CHAT_COMPLETIONS_URL,
            Provider::Mistral => MISTRAL_CHAT_COMPLETIONS_URL,
        }
    }

    pub fn for_model(model: &str) -> Self {
        detect_provider(model)
    }
}

#[derive(Clone)]
pub struct LlmClient {
    provider: Provider,
    url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_key: &str, model: &str) -> Result<Self> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::InvalidInput("api key is required".to_string()));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(LlmError::InvalidInput("model is required".to_string()));
        }
        let provider = detect_provider(model);
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(%e, "reqwest client build failed; falling back to default client");
                reqwest::Client::new()
            });
        Ok(Self {
            provider,
            url: provider.default_url().to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
        })
    }

    /// Points the client at a self-hosted or proxied chat-completions endpoint.
    pub fn with_base_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty()) {
            self.url = url;
        }
        self
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    #[tracing::instrument(level = "info", skip_all)]
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<ChatResponse> {
        if messages.is_empty() {
            return Err(LlmError::InvalidInput("messages are required".to_string()));
        }
        let c = ChatCompletionsClient::new(self.client.clone(), &self.url, &self.api_key, &self.model);
        c.chat(messages, params).await
    }
}

fn detect_provider(model: &str) -> Provider {
    let m = model.to_ascii_lowercase();
    if m.contains("mistral") || m.starts_with("codestral") || m.starts_with("pixtral") {
        return Provider::Mistral;
    }
    Provider::OpenAI
}
