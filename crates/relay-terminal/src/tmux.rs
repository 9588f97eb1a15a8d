//! `PaneDriver` backed by the tmux CLI.

use std::{process::Stdio, time::Duration};

use async_trait::async_trait;
use relay_core::{PaneDriver, RelayConfig, RelayError, TerminalTarget};
use tokio::process::Command;

use crate::command::{CommandBuildError, CommandBuilder, CommandParts};

/// Stderr fragments tmux prints when the pane or its server is gone.
const MISSING_TARGET_MARKERS: &[&str] = &[
    "can't find",
    "no such",
    "no server running",
    "error connecting to",
    "session not found",
];

/// Drives panes of an already running tmux server.
///
/// Never creates or destroys tmux sessions.
#[derive(Debug, Clone)]
pub struct TmuxDriver {
    builder: CommandBuilder,
    call_timeout: Duration,
}

impl TmuxDriver {
    /// Create a driver for `program` (may include global flags, e.g. `tmux -L relay`).
    #[must_use]
    pub fn new(program: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            builder: CommandBuilder::new(program),
            call_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.tmux_program.clone(), config.multiplexer_call_timeout())
    }

    async fn run(&self, parts: Result<CommandParts, CommandBuildError>, target: &TerminalTarget) -> Result<String, RelayError> {
        let (program, args) = parts
            .map_err(unavailable)?
            .into_resolved()
            .await
            .map_err(unavailable)?;

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.call_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(RelayError::BridgeUnavailable(format!("{}: {e}", program.display()))),
            Err(_) => {
                tracing::warn!(%target, timeout_secs = self.call_timeout.as_secs(), "tmux call timed out");
                return Err(RelayError::BridgeUnavailable(format!(
                    "tmux timeout after {}s",
                    self.call_timeout.as_secs()
                )));
            }
        };

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        tracing::debug!(%target, status = ?output.status.code(), stderr = %stderr.trim(), "tmux call failed");
        Err(classify_failure(target, &stderr))
    }
}

#[async_trait]
impl PaneDriver for TmuxDriver {
    async fn send_text(&self, target: &TerminalTarget, text: &str) -> Result<(), RelayError> {
        self.run(self.builder.send_literal(target, text), target).await.map(drop)
    }

    async fn send_key(&self, target: &TerminalTarget, key: &str) -> Result<(), RelayError> {
        self.run(self.builder.send_key(target, key), target).await.map(drop)
    }

    async fn capture(&self, target: &TerminalTarget, lines: usize) -> Result<String, RelayError> {
        self.run(self.builder.capture(target, lines), target).await
    }
}

fn unavailable(e: CommandBuildError) -> RelayError {
    RelayError::BridgeUnavailable(e.to_string())
}

/// Map a failed tmux call to the error taxonomy.
#[must_use]
pub fn classify_failure(target: &TerminalTarget, stderr: &str) -> RelayError {
    let lower = stderr.to_lowercase();
    if MISSING_TARGET_MARKERS.iter().any(|m| lower.contains(m)) {
        RelayError::TargetNotFound {
            target: target.to_string(),
        }
    } else {
        let message = stderr.trim();
        RelayError::BridgeUnavailable(if message.is_empty() {
            "tmux exited with an error".to_string()
        } else {
            message.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> TerminalTarget {
        TerminalTarget::new("relay-test-missing", 0, 0)
    }

    #[test]
    fn test_classify_failure() {
        assert!(matches!(
            classify_failure(&target(), "can't find session: relay-test-missing\n"),
            RelayError::TargetNotFound { target } if target == "relay-test-missing:0.0"
        ));
        assert!(matches!(
            classify_failure(&target(), "no server running on /tmp/tmux-0/default"),
            RelayError::TargetNotFound { .. }
        ));
        assert!(matches!(
            classify_failure(&target(), "unknown command: capture-pain"),
            RelayError::BridgeUnavailable(m) if m.contains("capture-pain")
        ));
        assert!(matches!(classify_failure(&target(), ""), RelayError::BridgeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let driver = TmuxDriver::new("/definitely/missing/tmux", Duration::from_secs(1));
        let err = driver.capture(&target(), 10).await.unwrap_err();
        assert!(matches!(err, RelayError::BridgeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_target_not_found() {
        if relay_shell::resolve_executable_path("tmux").await.is_none() {
            return;
        }
        let driver = TmuxDriver::new("tmux -L relay-test-no-such-server", Duration::from_secs(5));
        let err = driver.send_key(&target(), "Enter").await.unwrap_err();
        assert!(matches!(err, RelayError::TargetNotFound { .. }), "{err:?}");
    }
}
