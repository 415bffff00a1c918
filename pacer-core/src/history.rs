//! Contact history: who was messaged and when.
//!
//! Fail-open everywhere: an unreadable or corrupt blob is treated as an empty
//! history, and a failed write is logged and dropped. History problems never
//! block a send and never cause a skip.

use crate::recipient::RecipientNumber;
use crate::storage::KvStore;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const HISTORY_KEY: &str = "KEY_MESSAGE_HISTORY";
pub const DEFAULT_RETENTION_DAYS: i64 = 3;
pub const SNIPPET_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "lastSent")]
    pub last_sent_epoch_millis: i64,
    #[serde(rename = "message", default)]
    pub message_snippet: String,
    #[serde(rename = "count", default)]
    pub send_count: u32,
}

impl HistoryEntry {
    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis()
            .saturating_sub(self.last_sent_epoch_millis)
    }
}

pub type HistoryMap = BTreeMap<String, HistoryEntry>;

/// Drops every entry strictly older than `retention`. Returns how many went.
pub fn purge_expired(history: &mut HistoryMap, now: DateTime<Utc>, retention: Duration) -> usize {
    let before = history.len();
    let retention_ms = retention.num_milliseconds();
    history.retain(|_, entry| entry.age_millis(now) <= retention_ms);
    before - history.len()
}

/// True when the entry is still inside the retention window.
pub fn is_recent(entry: &HistoryEntry, now: DateTime<Utc>, retention: Duration) -> bool {
    entry.age_millis(now) < retention.num_milliseconds()
}

fn snippet(message: &str) -> String {
    message.chars().take(SNIPPET_MAX_CHARS).collect()
}

pub struct ContactHistory {
    store: Arc<dyn KvStore>,
    retention: Duration,
    write_lock: Mutex<()>,
}

impl ContactHistory {
    pub fn new(store: Arc<dyn KvStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            write_lock: Mutex::new(()),
        }
    }

    pub fn with_default_retention(store: Arc<dyn KvStore>) -> Self {
        Self::new(store, Duration::days(DEFAULT_RETENTION_DAYS))
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    async fn load(&self) -> HistoryMap {
        let raw = match self.store.get(HISTORY_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return HistoryMap::new(),
            Err(error) => {
                tracing::warn!(%error, "history read failed; treating as empty");
                return HistoryMap::new();
            }
        };
        match serde_json::from_str::<HistoryMap>(&raw) {
            Ok(history) => history,
            Err(error) => {
                tracing::warn!(%error, "history blob is corrupt; treating as empty");
                HistoryMap::new()
            }
        }
    }

    async fn save(&self, history: &HistoryMap) {
        let raw = match serde_json::to_string(history) {
            Ok(raw) => raw,
            Err(error) => {
                tracing::warn!(%error, "history encode failed; write skipped");
                return;
            }
        };
        if let Err(error) = self.store.set(HISTORY_KEY, &raw).await {
            tracing::warn!(%error, "history write failed; continuing without it");
        }
    }

    /// Upserts the entry for `number`, then purges expired entries.
    #[tracing::instrument(level = "debug", skip_all, fields(number = %number))]
    pub async fn record(
        &self,
        number: &RecipientNumber,
        message: &str,
        now: DateTime<Utc>,
    ) -> HistoryEntry {
        let _guard = self.write_lock.lock().await;
        let mut history = self.load().await;
        let send_count = history
            .get(number.as_str())
            .map(|e| e.send_count)
            .unwrap_or(0)
            .saturating_add(1);
        let entry = HistoryEntry {
            last_sent_epoch_millis: now.timestamp_millis(),
            message_snippet: snippet(message),
            send_count,
        };
        history.insert(number.to_string(), entry.clone());
        let purged = purge_expired(&mut history, now, self.retention);
        self.save(&history).await;
        tracing::info!(send_count, purged, "recorded contact");
        entry
    }

    pub async fn last_contact(&self, number: &RecipientNumber) -> Option<HistoryEntry> {
        self.load().await.remove(number.as_str())
    }

    pub async fn should_skip(&self, number: &RecipientNumber, now: DateTime<Utc>) -> bool {
        match self.last_contact(number).await {
            Some(entry) => is_recent(&entry, now, self.retention),
            None => false,
        }
    }

    pub async fn get_all(&self) -> HistoryMap {
        self.load().await
    }

    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        if let Err(error) = self.store.remove(HISTORY_KEY).await {
            tracing::warn!(%error, "history clear failed");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::storage::MemoryKvStore;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Store whose every operation fails.
    pub(crate) struct BrokenKvStore;

    #[async_trait]
    impl KvStore for BrokenKvStore {
        async fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow!("disk on fire"))
        }

        async fn set(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }

        async fn remove(&self, _key: &str) -> anyhow::Result<()> {
            Err(anyhow!("disk on fire"))
        }
    }

    fn number(raw: &str) -> RecipientNumber {
        RecipientNumber::parse(raw).expect("valid number")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn entry_at(at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            last_sent_epoch_millis: at.timestamp_millis(),
            message_snippet: String::new(),
            send_count: 1,
        }
    }

    #[tokio::test]
    async fn skip_holds_inside_window_and_lifts_at_boundary() {
        let history = ContactHistory::with_default_retention(Arc::new(MemoryKvStore::new()));
        let n = number("79990000001");
        history.record(&n, "hello", t0()).await;

        assert!(history.should_skip(&n, t0()).await);
        assert!(history.should_skip(&n, t0() + Duration::days(3) - Duration::milliseconds(1)).await);
        assert!(!history.should_skip(&n, t0() + Duration::days(3)).await);
        assert!(!history.should_skip(&number("79990000002"), t0()).await);
    }

    #[tokio::test]
    async fn record_increments_count_and_truncates_snippet() {
        let history = ContactHistory::with_default_retention(Arc::new(MemoryKvStore::new()));
        let n = number("+7 999 000-00-01");
        let long = "ж".repeat(150);
        history.record(&n, "first", t0()).await;
        let entry = history.record(&n, &long, t0() + Duration::hours(1)).await;

        assert_eq!(entry.send_count, 2);
        assert_eq!(entry.message_snippet.chars().count(), SNIPPET_MAX_CHARS);
        let all = history.get_all().await;
        assert_eq!(all.len(), 1);
        assert_eq!(all["79990000001"], entry);
    }

    #[test]
    fn purge_removes_exactly_expired_entries_and_is_idempotent() {
        let retention = Duration::days(3);
        let now = t0();
        let mut map = HistoryMap::new();
        map.insert("old".into(), entry_at(now - Duration::days(4)));
        map.insert("edge".into(), entry_at(now - Duration::days(3)));
        map.insert("fresh".into(), entry_at(now - Duration::hours(5)));

        assert_eq!(purge_expired(&mut map, now, retention), 1);
        let once = map.clone();
        assert_eq!(purge_expired(&mut map, now, retention), 0);
        assert_eq!(map, once);
        assert!(map.contains_key("edge"));
        assert!(map.contains_key("fresh"));
        assert!(!map.contains_key("old"));
    }

    #[tokio::test]
    async fn every_write_purges_stale_entries() {
        let store = Arc::new(MemoryKvStore::new());
        let history = ContactHistory::with_default_retention(store.clone());
        history.record(&number("79990000001"), "a", t0()).await;
        history
            .record(&number("79990000002"), "b", t0() + Duration::days(5))
            .await;

        let all = history.get_all().await;
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["79990000002"]);
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_empty_and_is_replaced_on_write() {
        let store = Arc::new(MemoryKvStore::new());
        store.set(HISTORY_KEY, "{not json").await.expect("seed corrupt blob");
        let history = ContactHistory::with_default_retention(store.clone());

        assert!(history.get_all().await.is_empty());
        assert!(!history.should_skip(&number("79990000001"), t0()).await);

        history.record(&number("79990000001"), "hi", t0()).await;
        assert_eq!(history.get_all().await.len(), 1);
    }

    #[tokio::test]
    async fn storage_failures_fail_open() {
        let history = ContactHistory::with_default_retention(Arc::new(BrokenKvStore));
        let n = number("79990000001");
        let entry = history.record(&n, "hello", t0()).await;
        assert_eq!(entry.send_count, 1);
        assert!(!history.should_skip(&n, t0()).await);
        assert!(history.get_all().await.is_empty());
        history.clear().await;
    }

    #[tokio::test]
    async fn clear_drops_all_entries() {
        let history = ContactHistory::with_default_retention(Arc::new(MemoryKvStore::new()));
        history.record(&number("79990000001"), "a", t0()).await;
        history.clear().await;
        assert!(history.get_all().await.is_empty());
    }

    #[test]
    fn entry_uses_legacy_field_names() {
        let json = serde_json::to_value(entry_at(t0())).expect("encode");
        assert!(json.get("lastSent").is_some());
        assert!(json.get("message").is_some());
        assert_eq!(json["count"], 1);
    }
}
