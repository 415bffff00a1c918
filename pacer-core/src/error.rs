use thiserror::Error;

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Reasons a job is rejected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("no valid recipients")]
    NoRecipients,

    #[error("invalid recipient number: {0}")]
    InvalidRecipient(String),

    #[error("a {0} send is already running")]
    Busy(&'static str),
}
