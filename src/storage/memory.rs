//! In-memory checkpoint store.
//!
//! Shares the compare-and-swap semantics of the durable stores so engines
//! can be exercised without a backend. Several engines (simulating several
//! processes) may share one instance through an `Arc`.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::checkpoint::{Checkpoint, CheckpointStore, StoreError};
use crate::stream::StreamKey;

#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<String, Checkpoint>>,
    unavailable: AtomicBool,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Read the stored checkpoint without going through the async contract.
    pub fn peek(&self, stream: &StreamKey) -> Option<Checkpoint> {
        self.checkpoints.lock().get(&stream.storage_key()).copied()
    }

    /// Overwrite a checkpoint unconditionally, bumping its version.
    ///
    /// Simulates a write from another process.
    pub fn force(&self, stream: &StreamKey, saved_physical: i64) -> u64 {
        let mut checkpoints = self.checkpoints.lock();
        let entry = checkpoints.entry(stream.storage_key()).or_insert(Checkpoint {
            saved_physical: 0,
            version: 0,
        });
        entry.saved_physical = saved_physical;
        entry.version += 1;
        entry.version
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, stream: &StreamKey) -> Result<Option<Checkpoint>, StoreError> {
        self.check_available()?;
        Ok(self.peek(stream))
    }

    async fn save(
        &self,
        stream: &StreamKey,
        saved_physical: i64,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        self.check_available()?;

        let mut checkpoints = self.checkpoints.lock();
        let key = stream.storage_key();
        let actual = checkpoints.get(&key).map(|c| c.version);

        if actual.unwrap_or(0) != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        let version = expected_version + 1;
        checkpoints.insert(
            key,
            Checkpoint {
                saved_physical,
                version,
            },
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load(&StreamKey::Global).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = MemoryCheckpointStore::new();
        let v1 = store.save(&StreamKey::Global, 3000, 0).await.unwrap();
        assert_eq!(v1, 1);

        let cp = store.load(&StreamKey::Global).await.unwrap().unwrap();
        assert_eq!(cp.saved_physical, 3000);
        assert_eq!(cp.version, 1);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryCheckpointStore::new();
        store.save(&StreamKey::Global, 3000, 0).await.unwrap();
        store.save(&StreamKey::Global, 6000, 1).await.unwrap();

        let err = store.save(&StreamKey::Global, 9000, 1).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 1,
                actual: Some(2)
            }
        ));
        assert_eq!(store.peek(&StreamKey::Global).unwrap().saved_physical, 6000);
    }

    #[tokio::test]
    async fn test_create_conflicts_when_present() {
        let store = MemoryCheckpointStore::new();
        store.save(&StreamKey::Global, 1, 0).await.unwrap();
        assert!(store.save(&StreamKey::Global, 2, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_unavailability() {
        let store = MemoryCheckpointStore::new();
        store.set_unavailable(true);
        let err = store.load(&StreamKey::Global).await.unwrap_err();
        assert!(err.is_transient());

        store.set_unavailable(false);
        assert!(store.load(&StreamKey::Global).await.is_ok());
    }
}
