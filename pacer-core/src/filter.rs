//! Recency pre-check: which recipients were contacted inside the retention
//! window.
//!
//! Advisory by default. The scheduler never filters on its own; callers decide
//! whether to strip the skipped recipients before submitting a job.

use crate::history::{ContactHistory, HistoryEntry, is_recent};
use crate::recipient::Recipient;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecencyPolicy {
    /// Report recent contacts, send to everyone.
    #[default]
    Advisory,
    /// Strip recent contacts before the job starts.
    Enforce,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Partition {
    pub skipped: Vec<Recipient>,
    pub eligible: Vec<Recipient>,
}

/// Stable split into recently contacted and eligible. Does not touch history.
pub async fn partition(
    history: &ContactHistory,
    recipients: Vec<Recipient>,
    now: DateTime<Utc>,
) -> Partition {
    let snapshot = history.get_all().await;
    let retention = history.retention();
    let mut out = Partition::default();
    for recipient in recipients {
        let recent = snapshot
            .get(recipient.number.as_str())
            .is_some_and(|entry| is_recent(entry, now, retention));
        if recent {
            out.skipped.push(recipient);
        } else {
            out.eligible.push(recipient);
        }
    }
    out
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentContact {
    pub recipient: Recipient,
    pub last_contact: HistoryEntry,
    pub days_since: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub total: usize,
    pub ready: Vec<Recipient>,
    pub recently_contacted: Vec<RecentContact>,
}

impl CheckReport {
    /// Input lines of the eligible recipients, in order, ready to replace the
    /// original list.
    pub fn remaining_lines(&self) -> Vec<String> {
        self.ready.iter().map(|r| r.raw_line.clone()).collect()
    }

    pub fn remaining_text(&self) -> String {
        self.remaining_lines().join("\n")
    }

    pub fn all_ready(&self) -> bool {
        self.recently_contacted.is_empty()
    }
}

/// The manual "check numbers" step: a partition plus how long ago each
/// skipped recipient was contacted.
pub async fn check(
    history: &ContactHistory,
    recipients: Vec<Recipient>,
    now: DateTime<Utc>,
) -> CheckReport {
    let total = recipients.len();
    let snapshot = history.get_all().await;
    let Partition { skipped, eligible } = partition(history, recipients, now).await;
    let recently_contacted = skipped
        .into_iter()
        .filter_map(|recipient| {
            let last_contact = snapshot.get(recipient.number.as_str())?.clone();
            let days_since = last_contact.age_millis(now) as f64 / 86_400_000.0;
            Some(RecentContact {
                recipient,
                last_contact,
                days_since,
            })
        })
        .collect::<Vec<_>>();
    tracing::info!(
        total,
        ready = eligible.len(),
        recent = recently_contacted.len(),
        "recency check complete"
    );
    CheckReport {
        total,
        ready: eligible,
        recently_contacted,
    }
}

/// Applies `policy` to a job's recipient list.
pub async fn apply_policy(
    policy: RecencyPolicy,
    history: &ContactHistory,
    recipients: Vec<Recipient>,
    now: DateTime<Utc>,
) -> Partition {
    match policy {
        RecencyPolicy::Advisory => Partition {
            skipped: Vec::new(),
            eligible: recipients,
        },
        RecencyPolicy::Enforce => partition(history, recipients, now).await,
    }
}
