//! Wires storage, actuator, variation and scheduler from config.

use crate::config::{ActuatorKind, PacerConfig};
use anyhow::Result;
use pacer_channels::{HttpBridgeActuator, PageActuator, WhatsAppCloudActuator};
use pacer_core::{
    ContactHistory, DraftStore, KvStore, LlmRephraser, NoVariation, SendScheduler, SqliteKvStore,
    TextVariation, TracingProgress,
};
use pacer_llm::LlmClient;
use std::sync::Arc;

pub struct PacerRuntime {
    pub history: Arc<ContactHistory>,
    pub drafts: DraftStore,
    pub scheduler: SendScheduler,
    pub variation: VariationSupport,
}

impl PacerRuntime {
    pub fn assemble(
        cfg: &PacerConfig,
        store: Arc<dyn KvStore>,
        actuator: Arc<dyn PageActuator>,
        variation: Option<Arc<dyn TextVariation>>,
    ) -> Self {
        let history = Arc::new(ContactHistory::new(store.clone(), cfg.retention()));
        let support = VariationSupport {
            available: variation.is_some(),
            default_vary: cfg.variation.enabled,
        };
        let variation: Arc<dyn TextVariation> = match variation {
            Some(variation) => variation,
            None => Arc::new(NoVariation),
        };
        let scheduler = SendScheduler::new(actuator, history.clone())
            .with_variation(variation)
            .with_progress(Arc::new(TracingProgress));
        Self {
            history,
            drafts: DraftStore::new(store),
            scheduler,
            variation: support,
        }
    }
}

/// Whether runs may ask for paraphrasing, and whether they do by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariationSupport {
    pub available: bool,
    pub default_vary: bool,
}

impl VariationSupport {
    /// Resolves a per-run request. Asking for paraphrasing without a
    /// configured rephraser is an error rather than a silent no-op.
    pub fn resolve(&self, requested: Option<bool>) -> Result<bool> {
        let vary = requested.unwrap_or(self.default_vary);
        if vary && !self.available {
            return Err(anyhow::anyhow!(
                "text variation is not configured; set variation.api_key"
            ));
        }
        Ok(vary)
    }
}

pub async fn build_runtime(cfg: &PacerConfig) -> Result<PacerRuntime> {
    let db_path = cfg.db_path()?;
    let store: Arc<dyn KvStore> = Arc::new(
        SqliteKvStore::open(&db_path)
            .await
            .map_err(|e| anyhow::anyhow!("open store {}: {e:#}", db_path.display()))?,
    );
    let actuator = build_actuator(cfg)?;
    let variation = build_variation(cfg)?;
    tracing::info!(
        db_path = %db_path.display(),
        actuator = %actuator.actuator_id(),
        variation_available = variation.is_some(),
        "runtime assembled"
    );
    Ok(PacerRuntime::assemble(cfg, store, actuator, variation))
}

pub fn build_actuator(cfg: &PacerConfig) -> Result<Arc<dyn PageActuator>> {
    let actuator: Arc<dyn PageActuator> = match cfg.actuator.kind {
        ActuatorKind::HttpBridge => Arc::new(
            HttpBridgeActuator::new(&cfg.actuator.bridge_url)?
                .with_auth_token(cfg.actuator.auth_token.clone())
                .with_from(&cfg.actuator.from),
        ),
        ActuatorKind::WhatsappCloud => Arc::new(WhatsAppCloudActuator::new(
            &cfg.actuator.access_token,
            &cfg.actuator.phone_number_id,
        )?),
    };
    Ok(actuator)
}

/// Builds the rephraser whenever an API key is configured, so per-run
/// `vary` requests work even when paraphrasing is off by default.
pub fn build_variation(cfg: &PacerConfig) -> Result<Option<Arc<dyn TextVariation>>> {
    let Some(api_key) = cfg.variation_api_key() else {
        if cfg.variation.enabled {
            return Err(anyhow::anyhow!("variation.api_key is required"));
        }
        return Ok(None);
    };
    let client = LlmClient::new(&api_key, &cfg.variation.model)?
        .with_base_url(cfg.variation.base_url.clone());
    let mut rephraser = LlmRephraser::new(client).with_params(cfg.generation_params());
    if let Some(prompt) = cfg.variation.prompt.clone().filter(|p| !p.trim().is_empty()) {
        rephraser = rephraser.with_prompt(prompt);
    }
    tracing::info!(
        model = %rephraser.model(),
        default_vary = cfg.variation.enabled,
        "text variation available"
    );
    Ok(Some(Arc::new(rephraser)))
}
