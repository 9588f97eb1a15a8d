//! JSON file snapshot storage.
//!
//! One pretty-printed file per conversation under `<data_dir>/sessions`.
//! File names are the conversation ID with everything outside
//! `[A-Za-z0-9_-]` percent-encoded.

use std::{
    fmt::Write as _,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use relay_core::{ConversationId, ConversationSnapshot, SnapshotStorage, StorageError};

const EXTENSION: &str = "json";

/// Stores snapshots as JSON files.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) `<data_dir>/sessions`.
    ///
    /// # Errors
    /// Returns error if the directory cannot be created.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let dir = data_dir.as_ref().join("sessions");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_id(id)))
    }
}

#[async_trait]
impl SnapshotStorage for FileStorage {
    async fn load(&self, id: &str) -> Result<Option<ConversationSnapshot>, StorageError> {
        match tokio::fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, id: &str, snapshot: &ConversationSnapshot) -> Result<(), StorageError> {
        let path = self.path_for(id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StorageError> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn list(&self) -> Result<Vec<ConversationId>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()).and_then(decode_id) {
                Some(id) => ids.push(id),
                None => tracing::warn!(path = %path.display(), "Skipping unrecognized snapshot file"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn encode_id(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for byte in id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

fn decode_id(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use relay_core::{EnvStore, Mode, TerminalTarget};

    use super::*;

    #[test]
    fn test_id_encoding() {
        for id in ["plain-id_1", "telegram:123/../x", "ünïcode chat", ""] {
            assert_eq!(decode_id(&encode_id(id)).as_deref(), Some(id));
        }
        assert_eq!(encode_id("a/b"), "a%2Fb");
        assert_eq!(decode_id("%zz"), None);
    }

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let snapshot = ConversationSnapshot {
            mode: Mode::Term,
            cwd: PathBuf::from("/ws/sub"),
            env: [("A", "1")].into_iter().collect::<EnvStore>(),
            target: Some(TerminalTarget::new("codex-demo", 0, 0)),
            last_pane_snapshot: "$ ls\n".into(),
            created_at: 10,
            last_used_at: 20,
        };

        storage.save("chat:1", &snapshot).await.unwrap();
        assert!(dir.path().join("sessions/chat%3A1.json").is_file());
        assert_eq!(storage.load("chat:1").await.unwrap(), Some(snapshot));
        assert_eq!(storage.load("chat:2").await.unwrap(), None);
        assert_eq!(storage.list().await.unwrap(), vec!["chat:1"]);

        let reopened = FileStorage::open(dir.path()).await.unwrap();
        assert_eq!(reopened.list().await.unwrap(), vec!["chat:1"]);

        storage.delete("chat:1").await.unwrap();
        storage.delete("chat:1").await.unwrap();
        assert!(storage.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        std::fs::write(storage.dir().join("bad.json"), "{not json").unwrap();
        assert!(matches!(storage.load("bad").await, Err(StorageError::Serde(_))));
    }
}
