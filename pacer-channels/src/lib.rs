//! Page actuators for Pacer.
//!
//! Actuators are pure I/O: they take an already paced, already rendered
//! message and perform the send on the target surface. Pacing decisions are
//! made by the caller and forwarded as a [`TimingHint`].

mod http_bridge;
mod traits;
mod types;
mod whatsapp;

pub use http_bridge::HttpBridgeActuator;
pub use traits::PageActuator;
pub use types::{ActuatorMessage, SendReceipt, TimingHint};
pub use whatsapp::WhatsAppCloudActuator;
