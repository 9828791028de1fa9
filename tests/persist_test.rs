use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use redpen::coach::{
    CoachingRequest, CoachingResult, Goal, Phrase, Proficiency, Register, WritingContext,
};
use redpen::gate::Capability;
use redpen::identity::CallerKey;
use redpen::persist::{PersistenceSink, PhraseBank, PhraseRecord, phrase_id, write_phrases};
use redpen::provider::TokenUsage;
use redpen::store::null::NullStore;
use redpen::store::sqlite::SqliteStore;
use redpen::store::{Record, RecordKind, RecordQuery, Store, StoreError};

fn request() -> CoachingRequest {
    CoachingRequest {
        text: "I am agree with you about this plan.".to_string(),
        register: Register::Neutral,
        goal: Goal::Correct,
        context: WritingContext::Email,
        level: Proficiency::Intermediate,
        capability: Capability::Haiku,
    }
}

fn phrase(text: &str) -> Phrase {
    Phrase {
        phrase: text.to_string(),
        meaning: format!("meaning of {text}"),
        example: format!("An example with {text}."),
    }
}

fn result(phrases: &[&str]) -> CoachingResult {
    CoachingResult {
        corrected: "I agree with you about this plan.".to_string(),
        enhanced: "I'm fully on board with this plan.".to_string(),
        variants: vec![],
        feedback: vec![],
        phrases: phrases.iter().map(|p| phrase(p)).collect(),
        error_categories: vec![],
        ambiguity: None,
        usage: TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
        },
        model: "test-model".to_string(),
    }
}

async fn stored_phrase_ids(store: &dyn Store, key: &CallerKey) -> Vec<String> {
    store
        .query(key.as_str(), &RecordQuery::kind(RecordKind::Phrase))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect()
}

/// Wraps a real store and fails selected operations.
struct FlakyStore {
    inner: SqliteStore,
    fail_sessions: bool,
    fail_batches: bool,
    batch_calls: AtomicUsize,
}

impl FlakyStore {
    fn new(fail_sessions: bool, fail_batches: bool) -> Self {
        Self {
            inner: SqliteStore::in_memory().unwrap(),
            fail_sessions,
            fail_batches,
            batch_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Store for FlakyStore {
    async fn create(&self, record: &Record) -> Result<(), StoreError> {
        if self.fail_sessions && record.kind == RecordKind::Session {
            return Err(StoreError::Backend("disk full".into()));
        }
        self.inner.create(record).await
    }

    async fn create_batch(&self, records: &[Record]) -> Result<(), StoreError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_batches {
            return Err(StoreError::Backend("batch endpoint down".into()));
        }
        self.inner.create_batch(records).await
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<Record>, StoreError> {
        self.inner.get(partition, id).await
    }

    async fn query(&self, partition: &str, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        self.inner.query(partition, query).await
    }

    async fn delete(&self, partition: &str, id: &str) -> Result<bool, StoreError> {
        self.inner.delete(partition, id).await
    }
}

#[tokio::test]
async fn records_session_and_phrases() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let sink = PersistenceSink::new(store.clone());
    let key = CallerKey::user("u1");

    let report = sink
        .record(&key, &request(), &result(&["on board", "fully agree"]))
        .await
        .unwrap();
    assert!(report.session_written);
    assert_eq!(report.phrases.written, 2);

    let bank = PhraseBank::new(store);
    let sessions = bank.sessions(&key, 10).await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].request, request());
    assert_eq!(sessions[0].result.phrases.len(), 2);

    let phrases = bank.phrases(&key).await.unwrap();
    assert_eq!(phrases.len(), 2);
    assert!(phrases.iter().all(|p| p.session_id == sessions[0].id));
}

#[tokio::test]
async fn duplicate_phrase_is_skipped_and_the_rest_persist() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let key = CallerKey::user("u1");

    // A phrase stored by an earlier session.
    let earlier = PhraseRecord::new(&key, &phrase("break the ice"), "old-session", Utc::now());
    store.create(&earlier.to_record(&key).unwrap()).await.unwrap();

    let sink = PersistenceSink::new(store.clone());
    let report = sink
        .record(
            &key,
            &request(),
            &result(&["hit the ground running", "Break the Ice", "touch base"]),
        )
        .await
        .unwrap();

    assert!(report.session_written);
    assert_eq!(report.phrases.written, 2);
    assert_eq!(report.phrases.duplicates, 1);
    assert_eq!(report.phrases.failed, 0);

    let ids = stored_phrase_ids(store.as_ref(), &key).await;
    assert_eq!(ids.len(), 3);
    assert!(ids.contains(&phrase_id(&key, "hit the ground running")));
    assert!(ids.contains(&phrase_id(&key, "touch base")));

    // The original record is untouched.
    let kept = PhraseBank::new(store).phrase(&key, &earlier.id).await.unwrap().unwrap();
    assert_eq!(kept.session_id, "old-session");
}

#[tokio::test]
async fn one_conflict_in_five_still_writes_four() {
    let store = SqliteStore::in_memory().unwrap();
    let key = CallerKey::anonymous("192.0.2.4");
    let now = Utc::now();
    let records: Vec<Record> = ["alpha", "beta", "gamma", "delta", "epsilon"]
        .iter()
        .map(|p| {
            PhraseRecord::new(&key, &phrase(p), "s", now)
                .to_record(&key)
                .unwrap()
        })
        .collect();
    store.create(&records[2]).await.unwrap();

    let outcome = write_phrases(&store, records).await;
    assert_eq!(outcome.written, 4);
    assert_eq!(outcome.duplicates, 1);
    assert_eq!(stored_phrase_ids(&store, &key).await.len(), 5);
}

#[tokio::test]
async fn rewriting_the_same_phrases_is_idempotent() {
    let store = SqliteStore::in_memory().unwrap();
    let key = CallerKey::user("u2");
    let build = || -> Vec<Record> {
        ["one", "two"]
            .iter()
            .map(|p| {
                PhraseRecord::new(&key, &phrase(p), "s", Utc::now())
                    .to_record(&key)
                    .unwrap()
            })
            .collect()
    };

    assert_eq!(write_phrases(&store, build()).await.written, 2);
    let again = write_phrases(&store, build()).await;
    assert_eq!(again.written, 0);
    assert_eq!(again.duplicates, 2);
    assert_eq!(stored_phrase_ids(&store, &key).await.len(), 2);
}

#[tokio::test]
async fn failed_batch_falls_back_to_single_writes() {
    let store = FlakyStore::new(false, true);
    let key = CallerKey::user("u3");
    let records: Vec<Record> = ["a b", "c d", "e f"]
        .iter()
        .map(|p| {
            PhraseRecord::new(&key, &phrase(p), "s", Utc::now())
                .to_record(&key)
                .unwrap()
        })
        .collect();

    let outcome = write_phrases(&store, records).await;
    assert_eq!(store.batch_calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.written, 3);
    assert_eq!(stored_phrase_ids(&store, &key).await.len(), 3);
}

#[tokio::test]
async fn session_failure_does_not_block_phrases() {
    let store = Arc::new(FlakyStore::new(true, false));
    let sink = PersistenceSink::new(store.clone());
    let key = CallerKey::user("u4");

    let report = sink
        .record(&key, &request(), &result(&["a phrase", "another phrase"]))
        .await
        .unwrap();
    assert!(!report.session_written);
    assert_eq!(report.phrases.written, 2);

    let sessions = store
        .query(key.as_str(), &RecordQuery::kind(RecordKind::Session))
        .await
        .unwrap();
    assert!(sessions.is_empty());
    assert_eq!(stored_phrase_ids(store.as_ref(), &key).await.len(), 2);
}

#[tokio::test]
async fn no_phrases_means_no_phrase_writes() {
    let store = Arc::new(FlakyStore::new(false, false));
    let sink = PersistenceSink::new(store.clone());
    let report = sink
        .record(&CallerKey::user("u5"), &request(), &result(&[]))
        .await
        .unwrap();
    assert!(report.session_written);
    assert_eq!(report.phrases.written, 0);
    assert_eq!(store.batch_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn null_store_makes_persistence_a_no_op() {
    let sink = PersistenceSink::new(Arc::new(NullStore));
    let report = sink
        .record(&CallerKey::user("u6"), &request(), &result(&["x y"]))
        .await
        .unwrap();
    assert!(report.session_written);
    assert_eq!(report.phrases.written, 1);
}

#[tokio::test]
async fn forget_removes_only_phrases() {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let key = CallerKey::user("u7");
    PersistenceSink::new(store.clone())
        .record(&key, &request(), &result(&["keep me", "drop me"]))
        .await
        .unwrap();

    let bank = PhraseBank::new(store);
    let drop_id = phrase_id(&key, "drop me");
    assert!(bank.forget_phrase(&key, &drop_id).await.unwrap());
    assert!(!bank.forget_phrase(&key, &drop_id).await.unwrap());

    let session_id = bank.sessions(&key, 1).await.unwrap()[0].id.clone();
    assert!(!bank.forget_phrase(&key, &session_id).await.unwrap());
    assert_eq!(bank.sessions(&key, 10).await.unwrap().len(), 1);

    let remaining: Vec<_> = bank
        .phrases(&key)
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.phrase)
        .collect();
    assert_eq!(remaining, ["keep me"]);
}
