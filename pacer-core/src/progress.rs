use crate::recipient::RecipientNumber;
use crate::scheduler::{JobSummary, SendOutcome, SendResult};

/// Observer for a running job. Callbacks run inline on the job task and
/// should return quickly.
pub trait ProgressSink: Send + Sync {
    /// `current` is 1-based; `(0, total, None)` marks the job start.
    fn on_progress(&self, current: usize, total: usize, recipient: Option<&RecipientNumber>);
    fn on_result(&self, result: &SendResult);
    fn on_complete(&self, summary: &JobSummary);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&self, _current: usize, _total: usize, _recipient: Option<&RecipientNumber>) {}
    fn on_result(&self, _result: &SendResult) {}
    fn on_complete(&self, _summary: &JobSummary) {}
}

/// Logs every callback.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&self, current: usize, total: usize, recipient: Option<&RecipientNumber>) {
        match recipient {
            Some(number) => tracing::info!(current, total, %number, "sending"),
            None => tracing::info!(total, "job started"),
        }
    }

    fn on_result(&self, result: &SendResult) {
        match &result.outcome {
            SendOutcome::Sent => tracing::info!(
                index = result.index,
                number = %result.number,
                personality = ?result.plan.map(|p| p.personality),
                "sent"
            ),
            SendOutcome::Failed { error } => tracing::warn!(
                index = result.index,
                number = %result.number,
                %error,
                "send failed"
            ),
            SendOutcome::Cancelled => tracing::info!(
                index = result.index,
                number = %result.number,
                "send cancelled"
            ),
        }
    }

    fn on_complete(&self, summary: &JobSummary) {
        tracing::info!(
            state = ?summary.state,
            total = summary.total,
            attempted = summary.attempted,
            sent = summary.sent,
            failed = summary.failed,
            "job finished"
        );
    }
}
