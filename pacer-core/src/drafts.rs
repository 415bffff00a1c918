//! Unsent input kept between sessions: the raw number list and the message
//! for each send path.

use crate::storage::KvStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const BULK_NUMBERS_KEY: &str = "KEY_PHONE_NUMBERS_BULK";
pub const BULK_MESSAGE_KEY: &str = "KEY_CURRENT_MSG_BULK";
pub const INDIVIDUAL_NUMBERS_KEY: &str = "KEY_PHONE_NUMBERS_INDIVIDUAL";
pub const INDIVIDUAL_MESSAGE_KEY: &str = "KEY_CURRENT_MSG_INDIVIDUAL";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDraft {
    #[serde(default)]
    pub lines: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualDraft {
    #[serde(default)]
    pub numbers: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone)]
pub struct DraftStore {
    store: Arc<dyn KvStore>,
}

impl DraftStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    async fn read(&self, key: &str) -> String {
        match self.store.get(key).await {
            Ok(value) => value.unwrap_or_default(),
            Err(error) => {
                tracing::warn!(key, %error, "draft read failed; using empty value");
                String::new()
            }
        }
    }

    pub async fn load_bulk(&self) -> BulkDraft {
        BulkDraft {
            lines: self.read(BULK_NUMBERS_KEY).await,
            message: self.read(BULK_MESSAGE_KEY).await,
        }
    }

    pub async fn save_bulk(&self, draft: &BulkDraft) -> Result<()> {
        self.store.set(BULK_NUMBERS_KEY, &draft.lines).await?;
        self.store.set(BULK_MESSAGE_KEY, &draft.message).await?;
        Ok(())
    }

    pub async fn clear_bulk(&self) -> Result<()> {
        self.store.remove(BULK_NUMBERS_KEY).await?;
        self.store.remove(BULK_MESSAGE_KEY).await?;
        Ok(())
    }

    pub async fn load_individual(&self) -> IndividualDraft {
        IndividualDraft {
            numbers: self.read(INDIVIDUAL_NUMBERS_KEY).await,
            message: self.read(INDIVIDUAL_MESSAGE_KEY).await,
        }
    }

    pub async fn save_individual(&self, draft: &IndividualDraft) -> Result<()> {
        self.store.set(INDIVIDUAL_NUMBERS_KEY, &draft.numbers).await?;
        self.store.set(INDIVIDUAL_MESSAGE_KEY, &draft.message).await?;
        Ok(())
    }

    pub async fn clear_individual(&self) -> Result<()> {
        self.store.remove(INDIVIDUAL_NUMBERS_KEY).await?;
        self.store.remove(INDIVIDUAL_MESSAGE_KEY).await?;
        Ok(())
    }
}
