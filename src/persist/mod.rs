//! Fire-and-forget recording of accepted results.
//!
//! [`PersistenceSink::record`] hands the work to a detached tokio task and
//! returns at once. That task is its own error boundary: every failure is
//! logged and dropped, nothing reaches the caller.

pub mod records;

use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coach::{CoachingRequest, CoachingResult};
use crate::identity::CallerKey;
use crate::store::{Record, RecordKind, RecordQuery, Store, StoreError};

pub use records::{PhraseRecord, SessionRecord, phrase_id};

/// What happened to a batch of phrase writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhraseOutcome {
    pub written: usize,
    /// Already in the bank.
    pub duplicates: usize,
    pub failed: usize,
}

/// Summary of one persistence task. Only used for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistReport {
    pub session_written: bool,
    pub phrases: PhraseOutcome,
}

#[derive(Clone)]
pub struct PersistenceSink {
    store: Arc<dyn Store>,
}

impl PersistenceSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Schedule the session and phrase writes for one accepted result.
    ///
    /// Returns immediately. The handle may be dropped; awaiting it only
    /// tells you the task finished, never whether it succeeded.
    pub fn record(
        &self,
        key: &CallerKey,
        request: &CoachingRequest,
        result: &CoachingResult,
    ) -> JoinHandle<PersistReport> {
        let store = Arc::clone(&self.store);
        let key = key.clone();
        let request = request.clone();
        let result = result.clone();
        tokio::spawn(async move { persist(store, key, request, result).await })
    }
}

async fn persist(
    store: Arc<dyn Store>,
    key: CallerKey,
    request: CoachingRequest,
    result: CoachingResult,
) -> PersistReport {
    let now = Utc::now();
    let session = SessionRecord::new(request, result, now);

    let mut phrase_records = Vec::with_capacity(session.result.phrases.len());
    for phrase in &session.result.phrases {
        match PhraseRecord::new(&key, phrase, &session.id, now).to_record(&key) {
            Ok(record) => phrase_records.push(record),
            Err(e) => warn!(caller = %key, error = %e, "skipping unencodable phrase"),
        }
    }

    let session_write = async {
        match session.to_record(&key) {
            Ok(record) => write_session(store.as_ref(), &record).await,
            Err(e) => {
                error!(caller = %key, error = %e, "failed to encode session record");
                false
            }
        }
    };
    let phrase_write = write_phrases(store.as_ref(), phrase_records);

    let (session_written, phrases) = tokio::join!(session_write, phrase_write);
    let report = PersistReport {
        session_written,
        phrases,
    };
    info!(
        caller = %key,
        session = %session.id,
        session_written,
        phrases_written = phrases.written,
        phrases_duplicate = phrases.duplicates,
        phrases_failed = phrases.failed,
        "persisted coaching result"
    );
    report
}

async fn write_session(store: &dyn Store, record: &Record) -> bool {
    match store.create(record).await {
        Ok(()) => true,
        Err(e) => {
            warn!(
                partition = %record.partition,
                id = %record.id,
                error = %e,
                "session write failed"
            );
            false
        }
    }
}

/// Grouped write first; if that fails for any reason, fall back to one
/// write per phrase and skip the ones that already exist.
pub async fn write_phrases(store: &dyn Store, records: Vec<Record>) -> PhraseOutcome {
    if records.is_empty() {
        return PhraseOutcome::default();
    }

    match store.create_batch(&records).await {
        Ok(()) => {
            return PhraseOutcome {
                written: records.len(),
                ..PhraseOutcome::default()
            };
        }
        Err(e) => debug!(
            count = records.len(),
            error = %e,
            "phrase batch failed, writing one by one"
        ),
    }

    let results = join_all(records.iter().map(|r| store.create(r))).await;
    let mut outcome = PhraseOutcome::default();
    for (record, result) in records.iter().zip(results) {
        match result {
            Ok(()) => outcome.written += 1,
            Err(e) if e.is_conflict() => {
                debug!(id = %record.id, "phrase already in bank");
                outcome.duplicates += 1;
            }
            Err(e) => {
                warn!(id = %record.id, error = %e, "phrase write failed");
                outcome.failed += 1;
            }
        }
    }
    outcome
}

/// Read side of what the sink writes.
pub struct PhraseBank {
    store: Arc<dyn Store>,
}

impl PhraseBank {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Most recent sessions first.
    pub async fn sessions(
        &self,
        key: &CallerKey,
        limit: usize,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        let query = RecordQuery {
            limit: Some(limit),
            newest_first: true,
            ..RecordQuery::kind(RecordKind::Session)
        };
        self.store
            .query(key.as_str(), &query)
            .await?
            .into_iter()
            .map(SessionRecord::from_record)
            .collect()
    }

    /// Every phrase in the bank, oldest first.
    pub async fn phrases(&self, key: &CallerKey) -> Result<Vec<PhraseRecord>, StoreError> {
        self.store
            .query(key.as_str(), &RecordQuery::kind(RecordKind::Phrase))
            .await?
            .into_iter()
            .map(PhraseRecord::from_record)
            .collect()
    }

    pub async fn phrase(
        &self,
        key: &CallerKey,
        id: &str,
    ) -> Result<Option<PhraseRecord>, StoreError> {
        match self.store.get(key.as_str(), id).await? {
            Some(record) if record.kind == RecordKind::Phrase => {
                PhraseRecord::from_record(record).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Remove a phrase. Returns whether it existed.
    pub async fn forget_phrase(&self, key: &CallerKey, id: &str) -> Result<bool, StoreError> {
        if self.phrase(key, id).await?.is_none() {
            return Ok(false);
        }
        self.store.delete(key.as_str(), id).await
    }
}
