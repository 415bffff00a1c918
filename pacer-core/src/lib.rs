//! Paced message delivery: typing-time model, contact history, recency
//! filtering, templating, paraphrasing and the send scheduler.

mod delay;
mod drafts;
mod error;
mod filter;
mod history;
mod progress;
mod recipient;
mod scheduler;
mod storage;
mod template;
mod variation;

pub use delay::{
    DelayRange, Personality, PersonalityProfile, SEND_SETTLE_DELAY, SPACE_DELAY, TypingPlan,
    choose_personality, duration_ms, estimate_typing_duration, keystroke_schedule, pause_delay,
    pause_roll, plan_typing, space_delay, thinking_delay, word_delay, word_range,
};
pub use drafts::{BulkDraft, DraftStore, IndividualDraft};
pub use error::{Result, SchedulerError};
pub use filter::{
    CheckReport, Partition, RecencyPolicy, RecentContact, apply_policy, check, partition,
};
pub use history::{
    ContactHistory, DEFAULT_RETENTION_DAYS, HISTORY_KEY, HistoryEntry, HistoryMap, is_recent,
    purge_expired,
};
pub use progress::{NoProgress, ProgressSink, TracingProgress};
pub use recipient::{MIN_NUMBER_DIGITS, ParsedRecipients, Recipient, RecipientNumber, parse_recipients};
pub use scheduler::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_GAP, IndividualHandle, JobHandle, JobState, JobSummary,
    SchedulerSnapshot, SendJob, SendOptions, SendOutcome, SendResult, SendScheduler, TypingMode,
};
pub use storage::{KvStore, MemoryKvStore, SqliteKvStore};
pub use template::{VALUE_ONE_TOKEN, VALUE_TWO_TOKEN, render};
pub use variation::{
    DEFAULT_PROMPT, DEFAULT_VARIATION_SPACING, LlmRephraser, NoVariation, TextVariation,
    clean_rephrased, generate_variations,
};
