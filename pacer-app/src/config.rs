//! Pacer configuration loader.
//!
//! `~/.pacer/config.toml`, then environment overrides, then validation.

use pacer_core::{DelayRange, RecencyPolicy, SendOptions, TypingMode};
use pacer_llm::{GenerationParams, Provider};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PacerConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub variation: VariationConfig,
    #[serde(default)]
    pub pacing: PacingConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_data_dir_setting")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir_setting(),
        }
    }
}

fn default_data_dir_setting() -> String {
    "~/.pacer/data".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    #[default]
    HttpBridge,
    WhatsappCloud,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default)]
    pub kind: ActuatorKind,
    /// Endpoint of the page bridge that drives the messaging tab.
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_bridge_from")]
    pub from: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub phone_number_id: String,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            kind: ActuatorKind::default(),
            bridge_url: default_bridge_url(),
            auth_token: None,
            from: default_bridge_from(),
            access_token: String::new(),
            phone_number_id: String::new(),
        }
    }
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8788/send".to_string()
}

fn default_bridge_from() -> String {
    "pacer".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_variation_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Rephrase prompt; `{message}` marks where the text goes.
    #[serde(default)]
    pub prompt: Option<String>,
}

impl Default for VariationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model: default_variation_model(),
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            prompt: None,
        }
    }
}

fn default_variation_model() -> String {
    "open-mistral-nemo".to_string()
}

fn default_temperature() -> f32 {
    0.8
}

fn default_max_tokens() -> u32 {
    500
}

#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_min_gap_ms")]
    pub min_gap_ms: u64,
    #[serde(default = "default_max_gap_ms")]
    pub max_gap_ms: u64,
    #[serde(default)]
    pub typing_mode: TypingMode,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default)]
    pub recency_policy: RecencyPolicy,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            min_gap_ms: default_min_gap_ms(),
            max_gap_ms: default_max_gap_ms(),
            typing_mode: TypingMode::default(),
            retention_days: default_retention_days(),
            recency_policy: RecencyPolicy::default(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    pacer_core::DEFAULT_BASE_DELAY_MS
}

fn default_min_gap_ms() -> u64 {
    pacer_core::DEFAULT_GAP.min_ms
}

fn default_max_gap_ms() -> u64 {
    pacer_core::DEFAULT_GAP.max_ms
}

fn default_retention_days() -> i64 {
    pacer_core::DEFAULT_RETENTION_DAYS
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8787
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    64
}

impl PacerConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    /// An explicit path must exist. The default path may be absent, in which
    /// case built-in defaults apply.
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let explicit = path.is_some();
        let path = path.unwrap_or_else(default_config_path);
        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config_path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("{e}"))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = var("PACER_BRIDGE_URL") {
            self.actuator.bridge_url = v;
        }
        if let Some(v) = var("PACER_BRIDGE_TOKEN") {
            self.actuator.auth_token = Some(v);
        }
        if let Some(v) = var("PACER_VARIATION_MODEL") {
            self.variation.model = v;
        }
        let key_var = match Provider::for_model(&self.variation.model) {
            Provider::Mistral => "MISTRAL_API_KEY",
            Provider::OpenAI => "OPENAI_API_KEY",
        };
        if let Some(v) = var(key_var) {
            self.variation.api_key = Some(v);
        }
        if let Some(v) = var("PACER_PORT") {
            match v.trim().parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring invalid PACER_PORT"),
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pacing.min_gap_ms > self.pacing.max_gap_ms {
            return Err(anyhow::anyhow!(
                "pacing.min_gap_ms ({}) must be <= pacing.max_gap_ms ({})",
                self.pacing.min_gap_ms,
                self.pacing.max_gap_ms
            ));
        }
        if self.pacing.retention_days <= 0 {
            return Err(anyhow::anyhow!("pacing.retention_days must be > 0"));
        }
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("server.port must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        match self.actuator.kind {
            ActuatorKind::HttpBridge => {
                let url = self.actuator.bridge_url.trim();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(anyhow::anyhow!(
                        "actuator.bridge_url must be an http(s) url, got {url:?}"
                    ));
                }
            }
            ActuatorKind::WhatsappCloud => {
                if self.actuator.access_token.trim().is_empty()
                    || self.actuator.phone_number_id.trim().is_empty()
                {
                    return Err(anyhow::anyhow!(
                        "actuator.access_token and actuator.phone_number_id are required for whatsapp_cloud"
                    ));
                }
            }
        }
        if self.variation.enabled {
            if self.variation.model.trim().is_empty() {
                return Err(anyhow::anyhow!("variation.model is required"));
            }
            if self.variation_api_key().is_none() {
                return Err(anyhow::anyhow!(
                    "variation.api_key is required when variation is enabled"
                ));
            }
            if !(0.0..=2.0).contains(&self.variation.temperature) {
                return Err(anyhow::anyhow!("variation.temperature must be within 0..=2"));
            }
            if self.variation.max_tokens == 0 {
                return Err(anyhow::anyhow!("variation.max_tokens must be > 0"));
            }
        }
        Ok(())
    }

    pub fn variation_api_key(&self) -> Option<String> {
        self.variation
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.variation.temperature,
            max_tokens: self.variation.max_tokens,
        }
    }

    /// Per-send pacing options; `vary` is set per request.
    pub fn send_options(&self, vary: bool) -> SendOptions {
        SendOptions {
            base_delay_ms: self.pacing.base_delay_ms,
            gap: DelayRange::new(self.pacing.min_gap_ms, self.pacing.max_gap_ms),
            vary,
            typing_mode: self.pacing.typing_mode,
        }
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.pacing.retention_days)
    }

    pub fn data_dir_path(&self) -> anyhow::Result<PathBuf> {
        expand_home(&self.general.data_dir)
    }

    pub fn db_path(&self) -> anyhow::Result<PathBuf> {
        Ok(self.data_dir_path()?.join("pacer.db"))
    }

    pub fn bind_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        format!("{}:{}", self.server.host.trim(), self.server.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server bind address: {e}"))
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".pacer").join("config.toml")
}

pub fn expand_home(path: &str) -> anyhow::Result<PathBuf> {
    let trimmed = path.trim().to_string();
    if !trimmed.starts_with("~/") {
        return Ok(PathBuf::from(trimmed));
    }
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(PathBuf::from(trimmed.replacen('~', &home, 1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = PacerConfig::from_toml_str("").expect("parse empty config");
        assert_eq!(cfg.actuator.kind, ActuatorKind::HttpBridge);
        assert_eq!(cfg.pacing.base_delay_ms, 5000);
        assert_eq!((cfg.pacing.min_gap_ms, cfg.pacing.max_gap_ms), (1500, 3500));
        assert_eq!(cfg.pacing.retention_days, 3);
        assert_eq!(cfg.pacing.recency_policy, RecencyPolicy::Advisory);
        assert_eq!(cfg.pacing.typing_mode, TypingMode::Simulated);
        assert_eq!(cfg.variation.model, "open-mistral-nemo");
        assert_eq!(cfg.server.port, 8787);
        cfg.validate().expect("defaults are valid");
    }

    #[test]
    fn parses_sections() {
        let cfg = PacerConfig::from_toml_str(
            r#"
[actuator]
kind = "whatsapp_cloud"
access_token = "tok"
phone_number_id = "123"

[pacing]
typing_mode = "estimated"
recency_policy = "enforce"
min_gap_ms = 2000
max_gap_ms = 2500

[variation]
enabled = true
api_key = "k"
temperature = 0.5
"#,
        )
        .expect("parse config");
        assert_eq!(cfg.actuator.kind, ActuatorKind::WhatsappCloud);
        assert_eq!(cfg.pacing.recency_policy, RecencyPolicy::Enforce);
        let options = cfg.send_options(true);
        assert_eq!(options.typing_mode, TypingMode::Estimated);
        assert_eq!(options.gap, DelayRange::new(2000, 2500));
        assert!(options.vary);
        assert_eq!(cfg.generation_params().max_tokens, 500);
        cfg.validate().expect("valid config");
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut cfg = PacerConfig::default();
        cfg.pacing.min_gap_ms = 5000;
        assert!(cfg.validate().is_err());

        let mut cfg = PacerConfig::default();
        cfg.pacing.retention_days = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = PacerConfig::default();
        cfg.actuator.bridge_url = "ftp://bridge".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = PacerConfig::default();
        cfg.variation.enabled = true;
        let err = cfg.validate().expect_err("missing api key should fail");
        assert!(err.to_string().contains("api_key"));

        let mut cfg = PacerConfig::default();
        cfg.actuator.kind = ActuatorKind::WhatsappCloud;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn env_overrides_pick_key_for_model_provider() {
        let vars = env(&[
            ("PACER_BRIDGE_URL", "https://bridge.local/send"),
            ("MISTRAL_API_KEY", "mistral-key"),
            ("OPENAI_API_KEY", "openai-key"),
            ("PACER_PORT", "9900"),
        ]);
        let mut cfg = PacerConfig::default();
        cfg.apply_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(cfg.actuator.bridge_url, "https://bridge.local/send");
        assert_eq!(cfg.variation_api_key().as_deref(), Some("mistral-key"));
        assert_eq!(cfg.server.port, 9900);

        let vars = env(&[
            ("PACER_VARIATION_MODEL", "gpt-4o-mini"),
            ("OPENAI_API_KEY", "openai-key"),
            ("PACER_PORT", "not-a-port"),
        ]);
        let mut cfg = PacerConfig::default();
        cfg.apply_overrides_from(|k| vars.get(k).cloned());
        assert_eq!(cfg.variation.model, "gpt-4o-mini");
        assert_eq!(cfg.variation_api_key().as_deref(), Some("openai-key"));
        assert_eq!(cfg.server.port, 8787);
    }

    #[tokio::test]
    async fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        assert!(PacerConfig::load(Some(missing)).await.is_err());
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(
            expand_home("/var/lib/pacer").expect("expand"),
            PathBuf::from("/var/lib/pacer")
        );
    }
}
