//! Workspace context supplied by the project collaborator.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::EnvStore;

/// Conversation identifier. Opaque beyond being a key.
pub type ConversationId = String;

/// How an inbound command is executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Run through the conversation's `ShellSession`.
    #[default]
    Shell,
    /// Inject into the bound terminal pane.
    Term,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shell" | "sh" => Ok(Self::Shell),
            "term" | "tmux" => Ok(Self::Term),
            other => Err(format!("Invalid mode: '{other}'. Valid options: 'shell', 'term'")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell => write!(f, "shell"),
            Self::Term => write!(f, "term"),
        }
    }
}

/// Boundary and defaults a new shell session starts from.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    /// Absolute path every `cd`/`source` is clamped to.
    pub root: PathBuf,

    /// Snapshot restored by `reset`.
    pub initial_env: EnvStore,
}

impl WorkspaceContext {
    /// Create a context seeded with the current process environment.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            initial_env: EnvStore::from_process(),
        }
    }

    /// Create a context with an explicit default environment.
    #[must_use]
    pub const fn with_env(root: PathBuf, initial_env: EnvStore) -> Self {
        Self { root, initial_env }
    }
}
