use crate::types::{ActuatorMessage, SendReceipt, TimingHint};
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait PageActuator: Send + Sync {
    /// Unique actuator identifier: "http_bridge", "whatsapp_cloud".
    fn actuator_id(&self) -> &str;

    /// Deliver one message to one recipient.
    ///
    /// The caller treats any error as a per-recipient failure.
    async fn send(
        &self,
        number: &str,
        message: ActuatorMessage,
        hint: &TimingHint,
    ) -> Result<SendReceipt>;

    /// True when the far side plays out an un-animated `hint` itself, as a
    /// page typing into its input does. Instant transports return false and
    /// the caller waits out `hint.remaining_ms()` before `send`.
    fn renders_typing(&self) -> bool {
        true
    }

    /// Cheap reachability check used by `doctor`.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
