use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use std::sync::{Mutex, MutexGuard};

use super::{Record, RecordKind, RecordQuery, Store, StoreError};

/// SQLite-backed record store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the records table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS records (
                partition  TEXT NOT NULL,
                id         TEXT NOT NULL,
                kind       TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                body       TEXT NOT NULL,
                PRIMARY KEY (partition, id)
            );
            CREATE INDEX IF NOT EXISTS records_by_time
                ON records (partition, kind, created_at);",
        )
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

fn insert(conn: &Connection, record: &Record) -> Result<(), StoreError> {
    let body = serde_json::to_string(&record.body).map_err(|e| StoreError::Corrupt(e.to_string()))?;
    conn.execute(
        "INSERT INTO records (partition, id, kind, created_at, body) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.partition,
            record.id,
            record.kind.as_str(),
            record.created_at.timestamp_micros(),
            body
        ],
    )
    .map_err(|e| map_insert_error(e, record))?;
    Ok(())
}

fn map_insert_error(err: rusqlite::Error, record: &Record) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            StoreError::Conflict {
                partition: record.partition.clone(),
                id: record.id.clone(),
            }
        }
        _ => backend(err),
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

/// Raw columns, decoded outside the rusqlite row callback.
struct RawRecord {
    partition: String,
    id: String,
    kind: String,
    created_at: i64,
    body: String,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            partition: row.get(0)?,
            id: row.get(1)?,
            kind: row.get(2)?,
            created_at: row.get(3)?,
            body: row.get(4)?,
        })
    }

    fn decode(self) -> Result<Record, StoreError> {
        let kind = RecordKind::parse(&self.kind)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown kind '{}'", self.kind)))?;
        let created_at = DateTime::<Utc>::from_timestamp_micros(self.created_at)
            .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp {}", self.created_at)))?;
        let body =
            serde_json::from_str(&self.body).map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Record {
            partition: self.partition,
            id: self.id,
            kind,
            created_at,
            body,
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn create(&self, record: &Record) -> Result<(), StoreError> {
        let conn = self.conn()?;
        insert(&conn, record)
    }

    async fn create_batch(&self, records: &[Record]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(backend)?;
        for record in records {
            // Dropping `tx` on error rolls the whole group back.
            insert(&tx, record)?;
        }
        tx.commit().map_err(backend)
    }

    async fn get(&self, partition: &str, id: &str) -> Result<Option<Record>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT partition, id, kind, created_at, body FROM records
                 WHERE partition = ?1 AND id = ?2",
                params![partition, id],
                RawRecord::from_row,
            )
            .optional()
            .map_err(backend)?;
        raw.map(RawRecord::decode).transpose()
    }

    async fn query(&self, partition: &str, query: &RecordQuery) -> Result<Vec<Record>, StoreError> {
        let order = if query.newest_first { "DESC" } else { "ASC" };
        let sql = format!(
            "SELECT partition, id, kind, created_at, body FROM records
             WHERE partition = ?1
               AND (?2 IS NULL OR kind = ?2)
               AND (?3 IS NULL OR created_at >= ?3)
               AND (?4 IS NULL OR created_at < ?4)
             ORDER BY created_at {order}, rowid {order}
             LIMIT ?5"
        );
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql).map_err(backend)?;
        let raws = stmt
            .query_map(
                params![
                    partition,
                    query.kind.map(RecordKind::as_str),
                    query.since.map(|t| t.timestamp_micros()),
                    query.until.map(|t| t.timestamp_micros()),
                    limit
                ],
                RawRecord::from_row,
            )
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        raws.into_iter().map(RawRecord::decode).collect()
    }

    async fn delete(&self, partition: &str, id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn
            .execute(
                "DELETE FROM records WHERE partition = ?1 AND id = ?2",
                params![partition, id],
            )
            .map_err(backend)?;
        Ok(removed > 0)
    }
}
