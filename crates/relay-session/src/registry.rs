//! Conversation registry: the single entry point for inbound commands.

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Instant};

use relay_core::{
    CommandResult, ConfigError, ConversationId, ConversationSnapshot, Mode, PaneDriver, RelayConfig, RelayError,
    ShellConfig, SnapshotStorage, StorageError, TerminalTarget, WorkspaceContext,
};
use relay_shell::ShellSession;
use relay_terminal::{SendOptions, TerminalBridge};
use tokio::sync::{Mutex, RwLock};

/// Per-conversation state guarded by the conversation lock.
#[derive(Debug)]
pub struct Conversation {
    pub session: ShellSession,
    pub target: Option<TerminalTarget>,
    /// Mode used when the caller does not pick one.
    pub mode: Mode,
    /// Last raw pane capture, baseline for the next delta.
    pub last_pane_snapshot: String,
    /// Set by `remove`; a removed conversation is never saved again.
    removed: bool,
}

impl Conversation {
    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            mode: self.mode,
            cwd: self.session.cwd().to_path_buf(),
            env: self.session.env().clone(),
            target: self.target.clone(),
            last_pane_snapshot: self.last_pane_snapshot.clone(),
            created_at: self.session.created_at(),
            last_used_at: self.session.last_used_at(),
        }
    }
}

/// Shared handle; locking it is the per-conversation lock.
pub type ConversationHandle = Arc<Mutex<Conversation>>;

/// Owns every conversation's shell session and pane binding.
///
/// Commands from one conversation are serialized by its lock; commands from
/// different conversations run in parallel. Terminal sends are serialized per
/// target by the bridge, never while a conversation lock is held.
pub struct SessionRegistry {
    ctx: WorkspaceContext,
    shell_config: ShellConfig,
    bridge: TerminalBridge,
    storage: Option<Arc<dyn SnapshotStorage>>,
    conversations: RwLock<HashMap<ConversationId, ConversationHandle>>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("root", &self.ctx.root)
            .field("persistent", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    #[must_use]
    pub fn new(ctx: WorkspaceContext, shell_config: ShellConfig, bridge: TerminalBridge) -> Self {
        Self {
            ctx,
            shell_config,
            bridge,
            storage: None,
            conversations: RwLock::new(HashMap::new()),
        }
    }

    /// Build from configuration, seeding sessions with the process environment.
    ///
    /// # Errors
    /// Returns error if the workspace root cannot be resolved.
    pub fn from_config(config: &RelayConfig, driver: Arc<dyn PaneDriver>) -> Result<Self, ConfigError> {
        let ctx = WorkspaceContext::new(config.resolved_workspace_root()?);
        Ok(Self::new(
            ctx,
            config.shell_config(),
            TerminalBridge::new(driver, config.bridge_config()),
        ))
    }

    /// Persist conversation state to `storage` after every mutation.
    #[must_use]
    pub fn with_storage(mut self, storage: Arc<dyn SnapshotStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    #[must_use]
    pub const fn workspace(&self) -> &WorkspaceContext {
        &self.ctx
    }

    /// Existing conversation or a fresh one rooted at the workspace root.
    pub async fn get_or_create(&self, id: &str) -> ConversationHandle {
        if let Some(handle) = self.conversations.read().await.get(id) {
            return Arc::clone(handle);
        }
        let mut conversations = self.conversations.write().await;
        let handle = conversations.entry(id.to_string()).or_insert_with(|| {
            tracing::debug!(conversation_id = %id, "Creating conversation");
            Arc::new(Mutex::new(self.new_conversation(id)))
        });
        Arc::clone(handle)
    }

    async fn get(&self, id: &str) -> Option<ConversationHandle> {
        self.conversations.read().await.get(id).map(Arc::clone)
    }

    /// Execute `text` for a conversation. Never fails: every error is
    /// degraded into the returned `CommandResult`.
    pub async fn handle(&self, id: &str, mode: Mode, text: &str) -> CommandResult {
        let started = Instant::now();
        let text = text.trim();
        let result = match mode {
            Mode::Shell => {
                let conversation = self.get_or_create(id).await;
                let mut conversation = conversation.lock().await;
                conversation.session.run(text).await
            }
            Mode::Term => self.send_to_pane(id, text).await.unwrap_or_else(|e| {
                tracing::warn!(conversation_id = %id, error = %e, "Terminal send failed");
                e.into_result(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            }),
        };
        self.persist(id).await;
        result
    }

    /// `handle` with the conversation's default mode.
    pub async fn handle_default(&self, id: &str, text: &str) -> CommandResult {
        let mode = self.get_or_create(id).await.lock().await.mode;
        self.handle(id, mode, text).await
    }

    async fn send_to_pane(&self, id: &str, text: &str) -> Result<CommandResult, RelayError> {
        let conversation = self.get_or_create(id).await;
        let (target, previous) = {
            let conversation = conversation.lock().await;
            let target = conversation.target.clone().ok_or(RelayError::NoTargetBound)?;
            (target, conversation.last_pane_snapshot.clone())
        };

        let options = SendOptions {
            previous_snapshot: (!previous.is_empty()).then_some(previous.as_str()),
            ..SendOptions::default()
        };
        let capture = self.bridge.send_and_capture(&target, text, options).await?;

        let mut conversation = conversation.lock().await;
        // Rebound while we were waiting; the capture belongs to the old pane.
        if conversation.target.as_ref() == Some(&target) {
            conversation.last_pane_snapshot = capture.snapshot;
        }
        Ok(capture.result)
    }

    /// Bind (or rebind) a pane. The shell session is untouched.
    pub async fn bind(&self, id: &str, target: TerminalTarget) {
        {
            let conversation = self.get_or_create(id).await;
            let mut conversation = conversation.lock().await;
            tracing::debug!(conversation_id = %id, %target, "Binding terminal target");
            conversation.target = Some(target);
            conversation.last_pane_snapshot.clear();
        }
        self.persist(id).await;
    }

    /// Drop the pane binding. Returns the previous target.
    pub async fn unbind(&self, id: &str) -> Option<TerminalTarget> {
        let conversation = self.get(id).await?;
        let previous = {
            let mut conversation = conversation.lock().await;
            conversation.last_pane_snapshot.clear();
            conversation.target.take()
        };
        self.persist(id).await;
        previous
    }

    pub async fn target(&self, id: &str) -> Option<TerminalTarget> {
        let conversation = self.get(id).await?;
        conversation.lock().await.target.clone()
    }

    /// Evict a conversation and its persisted snapshot.
    ///
    /// Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let handle = self.conversations.write().await.remove(id);
        let existed = handle.is_some();
        // Holding the lock waits out any save already in flight.
        let mut guard = match &handle {
            Some(handle) => Some(handle.lock().await),
            None => None,
        };
        if let Some(conversation) = guard.as_mut() {
            conversation.removed = true;
        }
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.delete(id).await {
                tracing::warn!(conversation_id = %id, error = %e, "Failed to delete snapshot");
            }
        }
        drop(guard);
        tracing::debug!(conversation_id = %id, existed, "Removed conversation");
        existed
    }

    /// Restore cwd to the workspace root and env to the initial snapshot.
    pub async fn reset(&self, id: &str) {
        self.get_or_create(id).await.lock().await.session.reset();
        self.persist(id).await;
    }

    pub async fn set_mode(&self, id: &str, mode: Mode) {
        self.get_or_create(id).await.lock().await.mode = mode;
        self.persist(id).await;
    }

    pub async fn mode(&self, id: &str) -> Mode {
        self.get_or_create(id).await.lock().await.mode
    }

    /// Session env with secret values masked, sorted by key.
    pub async fn env(&self, id: &str) -> Vec<(String, String)> {
        let conversation = self.get_or_create(id).await;
        let mut vars: Vec<(String, String)> = conversation.lock().await.session.env().redacted_view().into_iter().collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        vars
    }

    pub async fn cwd(&self, id: &str) -> PathBuf {
        self.get_or_create(id).await.lock().await.session.cwd().to_path_buf()
    }

    pub async fn conversation_ids(&self) -> Vec<ConversationId> {
        let mut ids: Vec<ConversationId> = self.conversations.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Restore every stored conversation. Unreadable snapshots are skipped.
    ///
    /// Returns the number of conversations restored.
    ///
    /// # Errors
    /// Returns error if the storage cannot be listed.
    pub async fn load(&self) -> Result<usize, StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };
        let mut restored = 0;
        for id in storage.list().await? {
            let snapshot = match storage.load(&id).await {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(conversation_id = %id, error = %e, "Skipping unreadable snapshot");
                    continue;
                }
            };
            let conversation = self.restore_conversation(&id, snapshot);
            self.conversations
                .write()
                .await
                .insert(id, Arc::new(Mutex::new(conversation)));
            restored += 1;
        }
        tracing::info!(restored, "Loaded conversations");
        Ok(restored)
    }

    /// Save one conversation if storage is configured and it still exists.
    pub async fn persist(&self, id: &str) {
        let Some(storage) = &self.storage else {
            return;
        };
        let Some(conversation) = self.get(id).await else {
            return;
        };
        let conversation = conversation.lock().await;
        if conversation.removed {
            return;
        }
        if let Err(e) = storage.save(id, &conversation.snapshot()).await {
            tracing::warn!(conversation_id = %id, error = %e, "Failed to persist conversation");
        }
    }

    /// Save every conversation. Called at shutdown.
    ///
    /// # Errors
    /// Returns the first storage error; remaining conversations are still attempted.
    pub async fn flush(&self) -> Result<usize, StorageError> {
        let Some(storage) = &self.storage else {
            return Ok(0);
        };
        let conversations: Vec<(ConversationId, ConversationHandle)> = self
            .conversations
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), Arc::clone(handle)))
            .collect();

        let mut first_error = None;
        let mut saved = 0;
        for (id, conversation) in conversations {
            let conversation = conversation.lock().await;
            if conversation.removed {
                continue;
            }
            match storage.save(&id, &conversation.snapshot()).await {
                Ok(()) => saved += 1,
                Err(e) => {
                    tracing::warn!(conversation_id = %id, error = %e, "Failed to flush conversation");
                    first_error.get_or_insert(e);
                }
            }
        }
        tracing::info!(saved, "Flushed conversations");
        first_error.map_or(Ok(saved), Err)
    }

    fn new_conversation(&self, id: &str) -> Conversation {
        Conversation {
            session: ShellSession::new(id, &self.ctx, self.shell_config.clone()),
            target: None,
            mode: Mode::default(),
            last_pane_snapshot: String::new(),
            removed: false,
        }
    }

    fn restore_conversation(&self, id: &str, snapshot: ConversationSnapshot) -> Conversation {
        let mut conversation = self.new_conversation(id);
        conversation
            .session
            .restore(&snapshot.cwd, snapshot.env, snapshot.created_at, snapshot.last_used_at);
        conversation.target = snapshot.target;
        conversation.mode = snapshot.mode;
        conversation.last_pane_snapshot = snapshot.last_pane_snapshot;
        conversation
    }
}
