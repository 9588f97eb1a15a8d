//! In-memory snapshot storage.

use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use relay_core::{ConversationId, ConversationSnapshot, SnapshotStorage, StorageError};

/// In-memory storage implementation.
///
/// Useful for tests and single-process deployments.
/// Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    snapshots: RwLock<HashMap<ConversationId, ConversationSnapshot>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn load(&self, id: &str) -> Result<Option<ConversationSnapshot>, StorageError> {
        Ok(self
            .snapshots
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(id)
            .cloned())
    }

    async fn save(&self, id: &str, snapshot: &ConversationSnapshot) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .insert(id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.snapshots
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .remove(id);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationId>, StorageError> {
        let snapshots = self
            .snapshots
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let mut ids: Vec<ConversationId> = snapshots.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use relay_core::{Mode, TerminalTarget};

    use super::*;

    fn snapshot() -> ConversationSnapshot {
        ConversationSnapshot {
            mode: Mode::Term,
            cwd: PathBuf::from("/ws/sub"),
            target: Some(TerminalTarget::new("codex-demo", 0, 0)),
            ..ConversationSnapshot::default()
        }
    }

    #[tokio::test]
    async fn test_save_load_delete() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.load("a").await.unwrap(), None);

        storage.save("b", &snapshot()).await.unwrap();
        storage.save("a", &ConversationSnapshot::default()).await.unwrap();
        assert_eq!(storage.load("b").await.unwrap(), Some(snapshot()));
        assert_eq!(storage.list().await.unwrap(), vec!["a", "b"]);

        storage.delete("b").await.unwrap();
        storage.delete("missing").await.unwrap();
        assert_eq!(storage.list().await.unwrap(), vec!["a"]);
    }
}
