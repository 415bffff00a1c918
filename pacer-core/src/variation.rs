//! Best-effort message paraphrasing.
//!
//! A rephrase never fails from the caller's point of view: any transport or
//! format problem yields the original text.

use async_trait::async_trait;
use pacer_llm::{ChatMessage, GenerationParams, LlmClient};
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

pub const DEFAULT_PROMPT: &str = "Перефразируй это сообщение на русском языке полностью, используя другие слова, но сохраняя тот же смысл и тон. Сделай его естественным и разговорным. Обязательно закончи сообщение полностью. Не включай количество символов или другую мета-информацию. Просто верни готовое перефразированное сообщение на русском языке: \"{message}\"";

/// Placeholder replaced with the text being rephrased.
pub const PROMPT_MESSAGE_TOKEN: &str = "{message}";

pub const DEFAULT_VARIATION_SPACING: Duration = Duration::from_millis(200);

static CHAR_COUNT_ANNOTATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)\(\s*\d+\s*characters?\s*\)").ok());

#[async_trait]
pub trait TextVariation: Send + Sync {
    async fn rephrase(&self, message: &str) -> String;
}

/// Identity variation, used when paraphrasing is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVariation;

#[async_trait]
impl TextVariation for NoVariation {
    async fn rephrase(&self, message: &str) -> String {
        message.to_string()
    }
}

pub struct LlmRephraser {
    client: LlmClient,
    prompt: String,
    params: GenerationParams,
}

impl LlmRephraser {
    pub fn new(client: LlmClient) -> Self {
        Self {
            client,
            prompt: DEFAULT_PROMPT.to_string(),
            params: GenerationParams::default(),
        }
    }

    /// `prompt` should contain `{message}`; without it the message is appended.
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    fn build_prompt(&self, message: &str) -> String {
        if self.prompt.contains(PROMPT_MESSAGE_TOKEN) {
            self.prompt.replace(PROMPT_MESSAGE_TOKEN, message)
        } else {
            format!("{}\n\n\"{message}\"", self.prompt)
        }
    }
}

#[async_trait]
impl TextVariation for LlmRephraser {
    #[tracing::instrument(level = "debug", skip_all, fields(model = %self.client.model()))]
    async fn rephrase(&self, message: &str) -> String {
        if message.trim().is_empty() {
            return message.to_string();
        }
        let prompt = self.build_prompt(message);
        let response = match self
            .client
            .chat(&[ChatMessage::user(prompt)], self.params)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(%error, "rephrase failed; sending original text");
                return message.to_string();
            }
        };
        let cleaned = clean_rephrased(&response.message.content);
        if cleaned.is_empty() {
            tracing::warn!("rephrase returned empty text; sending original text");
            return message.to_string();
        }
        tracing::debug!(
            original_chars = message.chars().count(),
            rephrased_chars = cleaned.chars().count(),
            "message rephrased"
        );
        cleaned
    }
}

/// Removes character-count annotations and one pair of wrapping quotes.
pub fn clean_rephrased(text: &str) -> String {
    let stripped = match CHAR_COUNT_ANNOTATION.as_ref() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };
    let mut s = stripped.trim();
    if let Some(rest) = s.strip_prefix(['"', '\'']) {
        s = rest;
    }
    if let Some(rest) = s.strip_suffix(['"', '\'']) {
        s = rest;
    }
    s.trim().to_string()
}

/// Produces `count` independent rephrasings, one request at a time with
/// `spacing` between requests.
pub async fn generate_variations(
    variation: &dyn TextVariation,
    message: &str,
    count: usize,
    spacing: Duration,
) -> Vec<String> {
    let mut out = Vec::with_capacity(count);
    for index in 0..count {
        if index > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        out.push(variation.rephrase(message).await);
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Variation that numbers each call, so tests can tell outputs apart.
    #[derive(Default)]
    pub(crate) struct CountingVariation {
        pub(crate) calls: AtomicUsize,
    }

    #[async_trait]
    impl TextVariation for CountingVariation {
        async fn rephrase(&self, message: &str) -> String {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{message} v{n}")
        }
    }

    #[test]
    fn clean_strips_annotations_and_quotes() {
        assert_eq!(
            clean_rephrased("\"Привет, как дела? (42 characters)\""),
            "Привет, как дела?"
        );
        assert_eq!(clean_rephrased("'ok' (1 Character)"), "ok");
        assert_eq!(clean_rephrased("  plain text  "), "plain text");
    }

    #[test]
    fn clean_removes_only_one_quote_on_each_side() {
        assert_eq!(clean_rephrased("\"\"quoted\"\""), "\"quoted\"");
    }

    #[test]
    fn clean_of_only_annotation_is_empty() {
        assert_eq!(clean_rephrased("(12 CHARACTERS)"), "");
    }

    #[tokio::test]
    async fn no_variation_is_identity() {
        assert_eq!(NoVariation.rephrase("same text").await, "same text");
    }

    #[tokio::test]
    async fn unreachable_service_returns_original() {
        let client = LlmClient::new("test-key", "open-mistral-nemo")
            .expect("client")
            .with_base_url(Some("http://127.0.0.1:9/v1/chat/completions".to_string()));
        let rephraser = LlmRephraser::new(client);
        assert_eq!(rephraser.rephrase("Добрый день").await, "Добрый день");
    }

    #[test]
    fn prompt_embeds_message() {
        let client = LlmClient::new("test-key", "open-mistral-nemo").expect("client");
        let rephraser = LlmRephraser::new(client);
        let prompt = rephraser.build_prompt("Привет");
        assert!(prompt.ends_with("\"Привет\""));

        let custom = LlmRephraser::new(
            LlmClient::new("test-key", "gpt-4o-mini").expect("client"),
        )
        .with_prompt("Rephrase in English.");
        assert_eq!(custom.build_prompt("hi"), "Rephrase in English.\n\n\"hi\"");
    }

    #[tokio::test(start_paused = true)]
    async fn generate_variations_runs_count_requests() {
        let variation = CountingVariation::default();
        let out = generate_variations(&variation, "msg", 3, DEFAULT_VARIATION_SPACING).await;
        assert_eq!(out, vec!["msg v1", "msg v2", "msg v3"]);
        assert!(generate_variations(&variation, "msg", 0, DEFAULT_VARIATION_SPACING)
            .await
            .is_empty());
    }
}
