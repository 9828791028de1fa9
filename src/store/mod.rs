//! Key-partitioned record store.
//!
//! Records live in partitions (one per caller) and are addressed by
//! `(partition, id)`. Creating a record whose identity already exists is a
//! [`StoreError::Conflict`], which is what makes repeated phrase writes
//! idempotent. There are no cross-partition or cross-call transactions;
//! only [`Store::create_batch`] groups writes.

pub mod null;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Session,
    Phrase,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Session => "session",
            RecordKind::Phrase => "phrase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "session" => Some(RecordKind::Session),
            "phrase" => Some(RecordKind::Phrase),
            _ => None,
        }
    }
}

/// A single stored item. `body` is opaque to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub partition: String,
    pub id: String,
    pub kind: RecordKind,
    pub created_at: DateTime<Utc>,
    pub body: serde_json::Value,
}

/// Filter for [`Store::query`]. Every field is optional; `since` is
/// inclusive and `until` exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub kind: Option<RecordKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    /// Return the most recent records first.
    pub newest_first: bool,
}

impl RecordQuery {
    pub fn kind(kind: RecordKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record {partition}/{id} already exists")]
    Conflict { partition: String, id: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store error: {0}")]
    Backend(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// Where accepted results end up. Could be SQLite, a remote service, or nothing.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert a new record. Fails with [`StoreError::Conflict`] if the
    /// identity is taken.
    async fn create(&self, record: &Record) -> Result<(), StoreError>;
    /// Insert several records as one grouped write. If any insert fails,
    /// none are kept.
    async fn create_batch(&self, records: &[Record]) -> Result<(), StoreError>;
    async fn get(&self, partition: &str, id: &str) -> Result<Option<Record>, StoreError>;
    async fn query(&self, partition: &str, query: &RecordQuery) -> Result<Vec<Record>, StoreError>;
    /// Returns whether a record was removed.
    async fn delete(&self, partition: &str, id: &str) -> Result<bool, StoreError>;
}
