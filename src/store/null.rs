use async_trait::async_trait;

use super::{Record, RecordQuery, Store, StoreError};

/// Accepts every write and remembers nothing. Stands in when the real
/// store cannot be opened, so persistence degrades to a no-op.
#[derive(Debug, Default)]
pub struct NullStore;

#[async_trait]
impl Store for NullStore {
    async fn create(&self, _record: &Record) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_batch(&self, _records: &[Record]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, _partition: &str, _id: &str) -> Result<Option<Record>, StoreError> {
        Ok(None)
    }

    async fn query(
        &self,
        _partition: &str,
        _query: &RecordQuery,
    ) -> Result<Vec<Record>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _partition: &str, _id: &str) -> Result<bool, StoreError> {
        Ok(false)
    }
}
