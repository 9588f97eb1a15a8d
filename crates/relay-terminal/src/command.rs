//! Multiplexer invocation building.

use std::path::PathBuf;

use relay_core::TerminalTarget;
use relay_shell::resolve_executable_path;
use thiserror::Error;

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Base command cannot be parsed: {0}")]
    InvalidBase(String),
    #[error("Base command is empty after parsing")]
    EmptyCommand,
    #[error("Executable not found: {0}")]
    NotFound(String),
}

/// Parsed command parts (program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandParts {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandParts {
    #[must_use]
    pub const fn new(program: String, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Resolve the program to an absolute path.
    ///
    /// # Errors
    /// Returns error if executable not found.
    pub async fn into_resolved(self) -> Result<(PathBuf, Vec<String>), CommandBuildError> {
        let Self { program, args } = self;
        let executable = resolve_executable_path(&program)
            .await
            .ok_or(CommandBuildError::NotFound(program))?;
        Ok((executable, args))
    }
}

/// Builder for `tmux` invocations.
///
/// `base` may carry global flags (`tmux -L relay`); they precede every
/// subcommand.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    /// Base executable command.
    pub base: String,
}

impl CommandBuilder {
    #[must_use]
    pub fn new<S: Into<String>>(base: S) -> Self {
        Self { base: base.into() }
    }

    /// `send-keys -l`: type `text` literally.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn send_literal(&self, target: &TerminalTarget, text: &str) -> Result<CommandParts, CommandBuildError> {
        let target = target.to_string();
        self.build(&["send-keys", "-t", &target, "-l", "--", text])
    }

    /// `send-keys`: press a named key such as `Enter` or `C-j`.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn send_key(&self, target: &TerminalTarget, key: &str) -> Result<CommandParts, CommandBuildError> {
        let target = target.to_string();
        self.build(&["send-keys", "-t", &target, key])
    }

    /// `capture-pane`: print the pane with `lines` lines of history, joining
    /// wrapped lines.
    ///
    /// # Errors
    /// Returns error if the base command is invalid.
    pub fn capture(&self, target: &TerminalTarget, lines: usize) -> Result<CommandParts, CommandBuildError> {
        let target = target.to_string();
        let start = format!("-{lines}");
        self.build(&["capture-pane", "-p", "-J", "-t", &target, "-S", &start])
    }

    fn build(&self, additional_args: &[&str]) -> Result<CommandParts, CommandBuildError> {
        let mut parts = shlex::split(&self.base).ok_or_else(|| CommandBuildError::InvalidBase(self.base.clone()))?;
        if parts.is_empty() {
            return Err(CommandBuildError::EmptyCommand);
        }
        parts.extend(additional_args.iter().map(ToString::to_string));

        let program = parts.remove(0);
        Ok(CommandParts::new(program, parts))
    }
}
