//! Core traits for pane access and snapshot storage.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ConversationId, EnvStore, Mode, RelayError, TerminalTarget};

/// Persisted conversation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    /// Default execution mode.
    #[serde(default)]
    pub mode: Mode,
    /// Working directory at the time of the snapshot.
    pub cwd: PathBuf,
    /// Session environment.
    #[serde(default)]
    pub env: EnvStore,
    /// Bound terminal pane, if any.
    #[serde(default)]
    pub target: Option<TerminalTarget>,
    /// Last captured pane text, used to compute deltas.
    #[serde(default)]
    pub last_pane_snapshot: String,
    /// Creation timestamp (Unix epoch seconds).
    #[serde(default)]
    pub created_at: i64,
    /// Last use timestamp.
    #[serde(default)]
    pub last_used_at: i64,
}

/// Storage error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Internal(String),
}

/// Trait for conversation snapshot backends.
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Load a snapshot by conversation ID.
    async fn load(&self, id: &str) -> Result<Option<ConversationSnapshot>, StorageError>;

    /// Insert or replace a snapshot.
    async fn save(&self, id: &str, snapshot: &ConversationSnapshot) -> Result<(), StorageError>;

    /// Delete a snapshot. Absent snapshots are not an error.
    async fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// List stored conversation IDs.
    async fn list(&self) -> Result<Vec<ConversationId>, StorageError>;
}

/// Trait for a live terminal multiplexer.
///
/// Implementations report a missing pane as `RelayError::TargetNotFound` and
/// a multiplexer that cannot be executed as `RelayError::BridgeUnavailable`.
#[async_trait]
pub trait PaneDriver: Send + Sync {
    /// Type literal text into the pane without pressing any key.
    async fn send_text(&self, target: &TerminalTarget, text: &str) -> Result<(), RelayError>;

    /// Press a named key (`Enter`, `C-j`, ...).
    async fn send_key(&self, target: &TerminalTarget, key: &str) -> Result<(), RelayError>;

    /// Rendered pane content including up to `lines` lines of history.
    async fn capture(&self, target: &TerminalTarget, lines: usize) -> Result<String, RelayError>;
}
