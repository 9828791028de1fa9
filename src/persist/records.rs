//! Typed views over the two record kinds the sink writes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::coach::{CoachingRequest, CoachingResult, Phrase};
use crate::identity::CallerKey;
use crate::store::{Record, RecordKind, StoreError};

/// One accepted submission and what came back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub request: CoachingRequest,
    pub result: CoachingResult,
}

/// One entry in a caller's phrase bank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhraseRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub phrase: String,
    pub meaning: String,
    pub example: String,
    /// Session the phrase was first extracted from.
    pub session_id: String,
}

#[derive(Serialize, Deserialize)]
struct SessionBody {
    request: CoachingRequest,
    result: CoachingResult,
}

#[derive(Serialize, Deserialize)]
struct PhraseBody {
    phrase: String,
    meaning: String,
    example: String,
    session_id: String,
}

impl SessionRecord {
    pub fn new(
        request: CoachingRequest,
        result: CoachingResult,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at,
            request,
            result,
        }
    }

    pub fn to_record(&self, key: &CallerKey) -> Result<Record, StoreError> {
        let body = SessionBody {
            request: self.request.clone(),
            result: self.result.clone(),
        };
        Ok(Record {
            partition: key.as_str().to_string(),
            id: self.id.clone(),
            kind: RecordKind::Session,
            created_at: self.created_at,
            body: serde_json::to_value(body).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        })
    }

    pub fn from_record(record: Record) -> Result<Self, StoreError> {
        let body: SessionBody =
            serde_json::from_value(record.body).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Self {
            id: record.id,
            created_at: record.created_at,
            request: body.request,
            result: body.result,
        })
    }
}

impl PhraseRecord {
    pub fn new(
        key: &CallerKey,
        phrase: &Phrase,
        session_id: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: phrase_id(key, &phrase.phrase),
            created_at,
            phrase: phrase.phrase.trim().to_string(),
            meaning: phrase.meaning.clone(),
            example: phrase.example.clone(),
            session_id: session_id.to_string(),
        }
    }

    pub fn to_record(&self, key: &CallerKey) -> Result<Record, StoreError> {
        let body = PhraseBody {
            phrase: self.phrase.clone(),
            meaning: self.meaning.clone(),
            example: self.example.clone(),
            session_id: self.session_id.clone(),
        };
        Ok(Record {
            partition: key.as_str().to_string(),
            id: self.id.clone(),
            kind: RecordKind::Phrase,
            created_at: self.created_at,
            body: serde_json::to_value(body).map_err(|e| StoreError::Corrupt(e.to_string()))?,
        })
    }

    pub fn from_record(record: Record) -> Result<Self, StoreError> {
        let body: PhraseBody =
            serde_json::from_value(record.body).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Self {
            id: record.id,
            created_at: record.created_at,
            phrase: body.phrase,
            meaning: body.meaning,
            example: body.example,
            session_id: body.session_id,
        })
    }
}

/// Stable identity of a phrase within a caller's bank: the same phrase,
/// modulo case and spacing, always maps to the same id.
pub fn phrase_id(key: &CallerKey, phrase: &str) -> String {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(key.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(normalized.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(16)
        .map(|b| format!("{b:02x}"))
        .collect()
}
