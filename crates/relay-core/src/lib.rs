//! Core types for conversation shell sessions and terminal bridging.
//!
//! This crate provides the fundamental building blocks:
//! - `CommandResult` - The reply produced for every inbound command
//! - `RelayError` / `ErrorKind` - The failure taxonomy
//! - `PathGuard` - Workspace-root path clamping
//! - `EnvStore` - Ordered environment with redaction and script parsing
//! - `RelayConfig` - Tunables consumed by the shell and terminal crates
//! - `TerminalTarget` - Pane locator
//! - Storage and pane-driver traits

pub mod config;
pub mod context;
pub mod env_store;
pub mod error;
pub mod path_guard;
pub mod result;
pub mod target;
pub mod traits;

pub use config::{BridgeConfig, ConfigError, RelayConfig, ShellConfig};
pub use context::{ConversationId, Mode, WorkspaceContext};
pub use env_store::EnvStore;
pub use error::{ErrorKind, RelayError};
pub use path_guard::PathGuard;
pub use result::CommandResult;
pub use target::TerminalTarget;
pub use traits::{ConversationSnapshot, PaneDriver, SnapshotStorage, StorageError};
