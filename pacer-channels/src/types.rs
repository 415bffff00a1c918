use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActuatorMessage {
    pub content: String,
}

impl ActuatorMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Pacing metadata computed by the scheduler for one message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingHint {
    /// Personality key, e.g. "MEDIUM".
    pub personality: String,
    pub thinking_ms: u64,
    pub typing_ms: u64,
    /// True when the caller already waited out the typing time itself.
    pub animated: bool,
    pub base_delay_ms: u64,
}

impl TimingHint {
    /// Time the actuator still has to spend before sending.
    pub fn remaining_ms(&self) -> u64 {
        if self.animated {
            0
        } else {
            self.thinking_ms.saturating_add(self.typing_ms)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub actuator_id: String,
    pub delivered_at: DateTime<Utc>,
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl SendReceipt {
    pub fn now(actuator_id: &str, detail: serde_json::Value) -> Self {
        Self {
            actuator_id: actuator_id.to_string(),
            delivered_at: Utc::now(),
            detail,
        }
    }
}
