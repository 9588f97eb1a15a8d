//! Failure taxonomy.
//!
//! Every variant is recoverable by the caller. Nothing here is fatal: the
//! registry degrades each error into a `CommandResult` so the conversation
//! always gets a reply.

use std::{io, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::CommandResult;

/// Synthetic exit code for failed directives.
pub const EXIT_FAILURE: i32 = 1;
/// Synthetic exit code for timed out commands (matches coreutils `timeout`).
pub const EXIT_TIMEOUT: i32 = 124;
/// Synthetic exit code when the child could not be launched.
pub const EXIT_LAUNCH_FAILED: i32 = 126;

/// Relay error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Path escapes workspace: {path}")]
    PathEscape { path: String },
    #[error("No such directory: {path}")]
    NoSuchDirectory { path: String },
    #[error("Timed out after {}s", .timeout.as_secs_f64())]
    CommandTimeout { timeout: Duration },
    #[error("Cannot source {path}: {source}")]
    SourceFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Terminal target not found: {target}")]
    TargetNotFound { target: String },
    #[error("Terminal bridge unavailable: {0}")]
    BridgeUnavailable(String),
    #[error("No terminal target bound to this conversation")]
    NoTargetBound,
    #[error("{0}")]
    InvalidDirective(String),
    #[error("Execution failed: {0}")]
    InternalExecution(String),
}

/// Data-free mirror of `RelayError`, carried inside `CommandResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PathEscape,
    NoSuchDirectory,
    CommandTimeout,
    SourceFile,
    TargetNotFound,
    BridgeUnavailable,
    NoTargetBound,
    InvalidDirective,
    InternalExecution,
}

impl RelayError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PathEscape { .. } => ErrorKind::PathEscape,
            Self::NoSuchDirectory { .. } => ErrorKind::NoSuchDirectory,
            Self::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            Self::SourceFile { .. } => ErrorKind::SourceFile,
            Self::TargetNotFound { .. } => ErrorKind::TargetNotFound,
            Self::BridgeUnavailable(_) => ErrorKind::BridgeUnavailable,
            Self::NoTargetBound => ErrorKind::NoTargetBound,
            Self::InvalidDirective(_) => ErrorKind::InvalidDirective,
            Self::InternalExecution(_) => ErrorKind::InternalExecution,
        }
    }

    /// Exit code reported for this failure. Terminal failures have none.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::CommandTimeout { .. } => Some(EXIT_TIMEOUT),
            Self::InternalExecution(_) => Some(EXIT_LAUNCH_FAILED),
            Self::TargetNotFound { .. } | Self::BridgeUnavailable(_) | Self::NoTargetBound => None,
            _ => Some(EXIT_FAILURE),
        }
    }

    /// Degrade into a failed `CommandResult`.
    #[must_use]
    pub fn into_result(self, duration_ms: u64) -> CommandResult {
        CommandResult::failure(self.kind(), self.exit_code(), self.to_string(), duration_ms)
    }
}
