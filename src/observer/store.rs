//! Checkpoint Store
//!
//! Durable record of the last successfully processed cursor. The backing
//! storage holds at most one row, keyed by [`SINGLETON_ID`].

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::cursor::{CheckpointRecord, Cursor, SINGLETON_ID};
use super::error::StorageError;

/// Singleton-row cursor persistence
///
/// `save` must be an atomic upsert: concurrent saves leave one of the
/// inputs, and sequential saves are applied in order. Neither method
/// retries. Monotonicity of the cursor is the caller's job.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Upsert the singleton row's cursor
    async fn save(&self, cursor: &Cursor) -> Result<(), StorageError>;

    /// Current cursor, `None` if never checkpointed
    async fn load(&self) -> Result<Option<Cursor>, StorageError>;

    /// Current row including its write timestamp
    async fn load_record(&self) -> Result<Option<CheckpointRecord>, StorageError> {
        Ok(self
            .load()
            .await?
            .map(|cursor| CheckpointRecord::new(cursor, None)))
    }
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    row: RwLock<Option<CheckpointRecord>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing checkpoint
    pub fn with_cursor(cursor: Cursor) -> Self {
        Self {
            row: RwLock::new(Some(CheckpointRecord::new(cursor, Some(Utc::now())))),
        }
    }

    /// Administrative reset. Must not race an active observer.
    pub async fn clear(&self) {
        *self.row.write().await = None;
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, cursor: &Cursor) -> Result<(), StorageError> {
        // Whole-row replacement under the write lock
        let mut row = self.row.write().await;
        *row = Some(CheckpointRecord {
            id: SINGLETON_ID,
            cursor: cursor.clone(),
            updated_at: Some(Utc::now()),
        });
        Ok(())
    }

    async fn load(&self) -> Result<Option<Cursor>, StorageError> {
        Ok(self.row.read().await.as_ref().map(|r| r.cursor.clone()))
    }

    async fn load_record(&self) -> Result<Option<CheckpointRecord>, StorageError> {
        Ok(self.row.read().await.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_empty_store_loads_nothing() {
        let store = MemoryCheckpointStore::new();
        assert_eq!(store.load().await.unwrap(), None);
        assert_eq!(store.load_record().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryCheckpointStore::new();
        store.save(&Cursor::new("c1")).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(Cursor::new("c1")));

        let record = store.load_record().await.unwrap().unwrap();
        assert_eq!(record.id, SINGLETON_ID);
        assert!(record.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_sequential_saves_keep_last() {
        let store = MemoryCheckpointStore::new();
        for i in 1..=50 {
            store.save(&Cursor::new(i.to_string())).await.unwrap();
        }
        assert_eq!(store.load().await.unwrap(), Some(Cursor::new("50")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_leave_one_input() {
        for _ in 0..20 {
            let store = Arc::new(MemoryCheckpointStore::new());
            let a = tokio::spawn({
                let store = store.clone();
                async move { store.save(&Cursor::new("left")).await }
            });
            let b = tokio::spawn({
                let store = store.clone();
                async move { store.save(&Cursor::new("right")).await }
            });
            a.await.unwrap().unwrap();
            b.await.unwrap().unwrap();

            let cursor = store.load().await.unwrap().unwrap();
            assert!(cursor.as_str() == "left" || cursor.as_str() == "right");
        }
    }

    #[tokio::test]
    async fn test_clear_returns_to_never_checkpointed() {
        let store = MemoryCheckpointStore::with_cursor(Cursor::new("5"));
        store.clear().await;
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_flaky_store_fails_then_recovers() {
        let store = mock::FlakyStore::new();
        store.fail_next_saves(1);
        assert!(store.save(&Cursor::new("1")).await.is_err());
        store.save(&Cursor::new("1")).await.unwrap();
        assert_eq!(store.history(), vec![Cursor::new("1")]);
        assert_eq!(store.save_calls(), 2);
    }
}
