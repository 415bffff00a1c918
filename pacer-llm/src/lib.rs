//! BYO-key chat-completions client used to vary outgoing message text.
//!
//! Pure HTTP client. Both supported providers speak the OpenAI
//! chat-completions wire format.

mod client;
mod error;
mod openai;
mod types;

pub use client::{LlmClient, Provider};
pub use error::{LlmError, Result};
pub use types::{ChatMessage, ChatResponse, GenerationParams, Role, Usage};
