//! The reply produced for every inbound command.

use serde::{Deserialize, Serialize};

use crate::ErrorKind;

/// Outcome of a shell command or terminal send.
///
/// Produced fresh per invocation; never mutated after return.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    /// Process exit code. Absent for terminal sends.
    pub exit_code: Option<i32>,
    /// Captured standard output (head-truncated to the budget).
    pub stdout: String,
    /// Captured standard error, kept separate from stdout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Tail of the pane after settling (terminal mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_pane_text: Option<String>,
    /// Text that appeared since the previous capture (terminal mode only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pane_delta: Option<String>,
    /// Whether any output was cut to fit the character budget.
    pub truncated: bool,
    /// Wall-clock duration of the operation.
    pub duration_ms: u64,
    /// Failure category, if the operation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
}

impl CommandResult {
    /// Successful directive with a short informational message.
    #[must_use]
    pub fn message(stdout: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            duration_ms,
            ..Self::default()
        }
    }

    /// Failed operation carrying its category and message.
    #[must_use]
    pub fn failure(
        kind: ErrorKind,
        exit_code: Option<i32>,
        message: impl Into<String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            exit_code,
            stderr: Some(message.into()),
            duration_ms,
            error: Some(kind),
            ..Self::default()
        }
    }

    /// Terminal capture result. Has no exit code.
    #[must_use]
    pub fn pane(captured: String, delta: Option<String>, truncated: bool, duration_ms: u64) -> Self {
        Self {
            captured_pane_text: Some(captured),
            pane_delta: delta,
            truncated,
            duration_ms,
            ..Self::default()
        }
    }

    /// True when no error category is set and the exit code (if any) is zero.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code.is_none_or(|c| c == 0)
    }

    /// Text a transport would show: non-blank pane delta (or capture) for terminal
    /// results, otherwise stdout followed by stderr.
    #[must_use]
    pub fn display_text(&self) -> String {
        let delta = self.pane_delta.as_ref().filter(|d| !d.trim().is_empty());
        if let Some(pane) = delta.or(self.captured_pane_text.as_ref()) {
            return pane.clone();
        }
        let mut text = self.stdout.clone();
        if let Some(err) = self.stderr.as_deref().filter(|e| !e.is_empty()) {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(err);
        }
        text
    }
}
