//! Paced delivery of one message to many recipients.
//!
//! A job walks its recipients in order: render, optionally rephrase, type,
//! dispatch, record. Every wait races the job's cancellation token. At most
//! one bulk job and one individual send run per scheduler.

use crate::delay::{
    DelayRange, Personality, SEND_SETTLE_DELAY, TypingPlan, choose_personality, duration_ms,
    keystroke_schedule, plan_typing, thinking_delay,
};
use crate::error::{Result, SchedulerError};
use crate::history::ContactHistory;
use crate::progress::{NoProgress, ProgressSink};
use crate::recipient::{Recipient, RecipientNumber};
use crate::template::render;
use crate::variation::{NoVariation, TextVariation};
use chrono::{DateTime, Utc};
use pacer_channels::{ActuatorMessage, PageActuator, TimingHint};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BASE_DELAY_MS: u64 = 5000;
pub const DEFAULT_GAP: DelayRange = DelayRange::new(1500, 3500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypingMode {
    /// The scheduler waits out thinking, keystrokes and settle time itself.
    #[default]
    Simulated,
    /// Only the estimate is computed and handed to the actuator.
    Estimated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOptions {
    /// Forwarded to the actuator as its own pre-send delay.
    pub base_delay_ms: u64,
    pub gap: DelayRange,
    pub vary: bool,
    pub typing_mode: TypingMode,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            gap: DEFAULT_GAP,
            vary: false,
            typing_mode: TypingMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendJob {
    pub recipients: Vec<Recipient>,
    pub template: String,
    #[serde(default)]
    pub options: SendOptions,
}

impl SendJob {
    pub fn new(recipients: Vec<Recipient>, template: impl Into<String>) -> Self {
        Self {
            recipients,
            template: template.into(),
            options: SendOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SendOptions) -> Self {
        self.options = options;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.template.trim().is_empty() {
            return Err(SchedulerError::EmptyMessage);
        }
        if self.recipients.is_empty() {
            return Err(SchedulerError::NoRecipients);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SendOutcome {
    Sent,
    Failed { error: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendResult {
    pub index: usize,
    pub number: RecipientNumber,
    pub outcome: SendOutcome,
    /// Final text after templating and variation.
    pub message: String,
    pub plan: Option<TypingPlan>,
}

impl SendResult {
    pub fn is_sent(&self) -> bool {
        self.outcome == SendOutcome::Sent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    pub state: JobState,
    pub total: usize,
    pub attempted: usize,
    pub sent: usize,
    pub failed: usize,
    pub results: Vec<SendResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Point-in-time view of one slot, for status displays.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSnapshot {
    pub state: JobState,
    pub current: usize,
    pub total: usize,
    pub current_number: Option<String>,
    pub sent: usize,
    pub failed: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct SlotState {
    snapshot: SchedulerSnapshot,
    token: Option<CancellationToken>,
}

/// One exclusive run slot (bulk or individual).
struct JobSlot {
    kind: &'static str,
    state: Mutex<SlotState>,
}

impl JobSlot {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            state: Mutex::new(SlotState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, total: usize) -> Result<CancellationToken> {
        let mut slot = self.lock();
        if slot.token.is_some() {
            return Err(SchedulerError::Busy(self.kind));
        }
        let token = CancellationToken::new();
        slot.token = Some(token.clone());
        slot.snapshot = SchedulerSnapshot {
            state: JobState::Running,
            total,
            started_at: Some(Utc::now()),
            ..SchedulerSnapshot::default()
        };
        Ok(token)
    }

    fn advance(&self, current: usize, number: &RecipientNumber) {
        let mut slot = self.lock();
        slot.snapshot.current = current;
        slot.snapshot.current_number = Some(number.to_string());
    }

    fn tally(&self, outcome: &SendOutcome) {
        let mut slot = self.lock();
        match outcome {
            SendOutcome::Sent => slot.snapshot.sent += 1,
            SendOutcome::Failed { .. } => slot.snapshot.failed += 1,
            SendOutcome::Cancelled => {}
        }
    }

    fn release(&self, state: JobState) {
        let mut slot = self.lock();
        slot.snapshot.state = state;
        slot.snapshot.current_number = None;
        slot.snapshot.finished_at = Some(Utc::now());
        slot.token = None;
    }

    fn cancel(&self) -> bool {
        match &self.lock().token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> SchedulerSnapshot {
        self.lock().snapshot.clone()
    }
}

/// Releases a claimed slot on drop. A run that unwinds leaves it `Failed`.
struct SlotGuard {
    slot: Arc<JobSlot>,
    state: JobState,
}

impl SlotGuard {
    fn new(slot: Arc<JobSlot>) -> Self {
        Self {
            slot,
            state: JobState::Failed,
        }
    }

    fn finish(mut self, state: JobState) {
        self.state = state;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slot.release(self.state);
    }
}

/// Handle to a job running on the tokio runtime.
pub struct JobHandle {
    token: CancellationToken,
    task: JoinHandle<JobSummary>,
    total: usize,
    started_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for the job. A run that panicked yields a `Failed` summary.
    pub async fn wait(self) -> JobSummary {
        match self.task.await {
            Ok(summary) => summary,
            Err(error) => {
                tracing::error!(%error, "send job aborted");
                JobSummary {
                    state: JobState::Failed,
                    total: self.total,
                    attempted: 0,
                    sent: 0,
                    failed: 0,
                    results: Vec::new(),
                    started_at: self.started_at,
                    finished_at: Utc::now(),
                    error: Some(error.to_string()),
                }
            }
        }
    }
}

/// Handle to an individual send running on the tokio runtime.
pub struct IndividualHandle {
    task: JoinHandle<SendResult>,
    number: RecipientNumber,
    message: String,
}

impl IndividualHandle {
    pub fn number(&self) -> &RecipientNumber {
        &self.number
    }

    /// Waits for the send. A run that panicked yields a `Failed` result.
    pub async fn wait(self) -> SendResult {
        match self.task.await {
            Ok(result) => result,
            Err(error) => {
                tracing::error!(%error, number = %self.number, "individual send aborted");
                SendResult {
                    index: 0,
                    number: self.number,
                    outcome: SendOutcome::Failed {
                        error: error.to_string(),
                    },
                    message: self.message,
                    plan: None,
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct SendScheduler {
    actuator: Arc<dyn PageActuator>,
    variation: Arc<dyn TextVariation>,
    history: Arc<ContactHistory>,
    progress: Arc<dyn ProgressSink>,
    rng: Arc<Mutex<StdRng>>,
    bulk: Arc<JobSlot>,
    individual: Arc<JobSlot>,
}

impl SendScheduler {
    pub fn new(actuator: Arc<dyn PageActuator>, history: Arc<ContactHistory>) -> Self {
        Self {
            actuator,
            variation: Arc::new(NoVariation),
            history,
            progress: Arc::new(NoProgress),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            bulk: Arc::new(JobSlot::new("bulk")),
            individual: Arc::new(JobSlot::new("individual")),
        }
    }

    pub fn with_variation(mut self, variation: Arc<dyn TextVariation>) -> Self {
        self.variation = variation;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Makes every delay draw reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Arc::new(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    pub fn history(&self) -> &Arc<ContactHistory> {
        &self.history
    }

    pub fn actuator_id(&self) -> &str {
        self.actuator.actuator_id()
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validates, claims the bulk slot and runs the job in the background.
    pub fn start_bulk(&self, job: SendJob) -> Result<JobHandle> {
        job.validate()?;
        let total = job.recipients.len();
        let token = self.bulk.claim(total)?;
        let guard = SlotGuard::new(self.bulk.clone());
        let scheduler = self.clone();
        let run_token = token.clone();
        let task = tokio::spawn(async move {
            let summary = scheduler.run_claimed(job, run_token).await;
            guard.finish(summary.state);
            summary
        });
        Ok(JobHandle {
            token,
            task,
            total,
            started_at: Utc::now(),
        })
    }

    /// Same as `start_bulk` but runs on the caller's task.
    pub async fn run_bulk(&self, job: SendJob) -> Result<JobSummary> {
        job.validate()?;
        let token = self.bulk.claim(job.recipients.len())?;
        let guard = SlotGuard::new(self.bulk.clone());
        let summary = self.run_claimed(job, token).await;
        guard.finish(summary.state);
        Ok(summary)
    }

    /// Cancels the running bulk job. Returns false when nothing was running.
    pub fn stop_bulk(&self) -> bool {
        let stopped = self.bulk.cancel();
        if stopped {
            tracing::info!("bulk send stop requested");
        }
        stopped
    }

    pub fn status(&self) -> SchedulerSnapshot {
        self.bulk.snapshot()
    }

    pub fn individual_status(&self) -> SchedulerSnapshot {
        self.individual.snapshot()
    }

    #[tracing::instrument(level = "info", skip_all, fields(total = job.recipients.len()))]
    async fn run_claimed(&self, job: SendJob, token: CancellationToken) -> JobSummary {
        let SendJob {
            recipients,
            template,
            options,
        } = job;
        let total = recipients.len();
        let started_at = Utc::now();
        let mut results: Vec<SendResult> = Vec::with_capacity(total);
        let mut sent = 0;
        let mut failed = 0;

        self.progress.on_progress(0, total, None);

        for (index, recipient) in recipients.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }
            let rendered = render(&template, recipient);
            let message = if options.vary {
                self.variation.rephrase(&rendered).await
            } else {
                rendered
            };
            if token.is_cancelled() {
                break;
            }

            self.bulk.advance(index + 1, &recipient.number);
            self.progress
                .on_progress(index + 1, total, Some(&recipient.number));

            let result = self
                .deliver(index, recipient.number.clone(), message, &options, &token)
                .await;
            self.bulk.tally(&result.outcome);
            self.progress.on_result(&result);
            let interrupted = result.outcome == SendOutcome::Cancelled;
            match result.outcome {
                SendOutcome::Sent => sent += 1,
                SendOutcome::Failed { .. } => failed += 1,
                SendOutcome::Cancelled => {}
            }
            results.push(result);
            if interrupted {
                break;
            }

            if index + 1 < total {
                let gap = options.gap.sample(&mut *self.rng());
                tracing::debug!(gap_ms = duration_ms(gap), "waiting before next recipient");
                if !sleep_or_cancel(gap, &token).await {
                    break;
                }
            }
        }

        let attempted = sent + failed;
        let state = if attempted == total {
            JobState::Completed
        } else {
            JobState::Cancelled
        };
        let summary = JobSummary {
            state,
            total,
            attempted,
            sent,
            failed,
            results,
            started_at,
            finished_at: Utc::now(),
            error: None,
        };
        self.progress.on_complete(&summary);
        summary
    }

    /// Sends one message to one number without queueing or gap delay.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn send_individual(
        &self,
        number: &str,
        message: &str,
        options: SendOptions,
    ) -> Result<SendResult> {
        let (number, token, guard) = self.claim_individual(number, message)?;
        let result = self
            .run_individual(number, message.to_string(), options, token)
            .await;
        guard.finish(individual_state(&result));
        Ok(result)
    }

    /// Validates and claims the individual slot synchronously, then sends in
    /// the background.
    pub fn start_individual(
        &self,
        number: &str,
        message: &str,
        options: SendOptions,
    ) -> Result<IndividualHandle> {
        let (number, token, guard) = self.claim_individual(number, message)?;
        let scheduler = self.clone();
        let run_number = number.clone();
        let run_message = message.to_string();
        let task = tokio::spawn(async move {
            let result = scheduler
                .run_individual(run_number, run_message, options, token)
                .await;
            guard.finish(individual_state(&result));
            result
        });
        Ok(IndividualHandle {
            task,
            number,
            message: message.to_string(),
        })
    }

    fn claim_individual(
        &self,
        number: &str,
        message: &str,
    ) -> Result<(RecipientNumber, CancellationToken, SlotGuard)> {
        if message.trim().is_empty() {
            return Err(SchedulerError::EmptyMessage);
        }
        let number = RecipientNumber::parse(number)
            .ok_or_else(|| SchedulerError::InvalidRecipient(number.trim().to_string()))?;
        let token = self.individual.claim(1)?;
        Ok((number, token, SlotGuard::new(self.individual.clone())))
    }

    #[tracing::instrument(level = "info", skip_all, fields(number = %number))]
    async fn run_individual(
        &self,
        number: RecipientNumber,
        message: String,
        options: SendOptions,
        token: CancellationToken,
    ) -> SendResult {
        let text = if options.vary {
            self.variation.rephrase(&message).await
        } else {
            message
        };
        let result = if token.is_cancelled() {
            cancelled(0, number, text, None)
        } else {
            self.individual.advance(1, &number);
            self.progress.on_progress(1, 1, Some(&number));
            self.deliver(0, number, text, &options, &token).await
        };
        self.individual.tally(&result.outcome);
        self.progress.on_result(&result);
        result
    }

    pub fn stop_individual(&self) -> bool {
        let stopped = self.individual.cancel();
        if stopped {
            tracing::info!("individual send stop requested");
        }
        stopped
    }

    /// Plans and performs typing, dispatches, and records history on success.
    async fn deliver(
        &self,
        index: usize,
        number: RecipientNumber,
        message: String,
        options: &SendOptions,
        token: &CancellationToken,
    ) -> SendResult {
        let (plan, steps) = self.plan(&message, options.typing_mode);

        let animated = options.typing_mode == TypingMode::Simulated;
        if animated && !simulate_typing(&plan, &steps, token).await {
            tracing::info!(%number, "cancelled while typing");
            return cancelled(index, number, message, Some(plan));
        }
        if token.is_cancelled() {
            return cancelled(index, number, message, Some(plan));
        }

        let mut hint = TimingHint {
            personality: plan.personality.key().to_string(),
            thinking_ms: plan.thinking_ms,
            typing_ms: plan.typing_ms,
            animated,
            base_delay_ms: options.base_delay_ms,
        };
        if !hint.animated && !self.actuator.renders_typing() {
            let wait = Duration::from_millis(hint.remaining_ms());
            if !sleep_or_cancel(wait, token).await {
                tracing::info!(%number, "cancelled while waiting out typing estimate");
                return cancelled(index, number, message, Some(plan));
            }
            hint.animated = true;
        }
        let outcome = match self
            .actuator
            .send(number.as_str(), ActuatorMessage::new(message.clone()), &hint)
            .await
        {
            Ok(receipt) => {
                tracing::debug!(
                    %number,
                    actuator = %receipt.actuator_id,
                    personality = plan.personality.key(),
                    "message dispatched"
                );
                self.history.record(&number, &message, Utc::now()).await;
                SendOutcome::Sent
            }
            Err(error) => {
                tracing::warn!(%number, error = %format!("{error:#}"), "dispatch failed");
                SendOutcome::Failed {
                    error: format!("{error:#}"),
                }
            }
        };
        SendResult {
            index,
            number,
            outcome,
            message,
            plan: Some(plan),
        }
    }

    /// Draws the typing plan. In simulated mode also returns the per-step
    /// delays, and the plan's typing time is their sum.
    fn plan(&self, message: &str, mode: TypingMode) -> (TypingPlan, Vec<Duration>) {
        let mut rng = self.rng();
        match mode {
            TypingMode::Estimated => (plan_typing(message, &mut *rng), Vec::new()),
            TypingMode::Simulated => {
                let personality: Personality = choose_personality(&mut *rng);
                let profile = personality.profile();
                let thinking = thinking_delay(profile, &mut *rng);
                let steps = keystroke_schedule(message, profile, &mut *rng);
                let typing: Duration = steps.iter().sum();
                let plan = TypingPlan {
                    personality,
                    thinking_ms: duration_ms(thinking),
                    typing_ms: duration_ms(typing),
                };
                (plan, steps)
            }
        }
    }
}

fn individual_state(result: &SendResult) -> JobState {
    if result.outcome == SendOutcome::Cancelled {
        JobState::Cancelled
    } else {
        JobState::Completed
    }
}

fn cancelled(
    index: usize,
    number: RecipientNumber,
    message: String,
    plan: Option<TypingPlan>,
) -> SendResult {
    SendResult {
        index,
        number,
        outcome: SendOutcome::Cancelled,
        message,
        plan,
    }
}

/// Returns false if the token fired before `duration` elapsed.
async fn sleep_or_cancel(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

async fn simulate_typing(
    plan: &TypingPlan,
    steps: &[Duration],
    token: &CancellationToken,
) -> bool {
    if !sleep_or_cancel(Duration::from_millis(plan.thinking_ms), token).await {
        return false;
    }
    for step in steps {
        if !sleep_or_cancel(*step, token).await {
            return false;
        }
    }
    sleep_or_cancel(SEND_SETTLE_DELAY, token).await
}
