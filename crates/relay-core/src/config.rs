//! Runtime configuration.

use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
    #[error("Workspace root unavailable: {0}")]
    Workspace(#[from] std::io::Error),
}

/// Top-level configuration, usually loaded from `RELAY_*` variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub workspace_root: PathBuf,
    pub data_dir: PathBuf,
    pub bind_addr: String,
    pub command_timeout_secs: u64,
    pub max_output_chars: usize,
    pub capture_lines: usize,
    pub settle_poll_ms: u64,
    pub settle_polls: u32,
    pub capture_timeout_secs: u64,
    pub submit_key: String,
    pub newline_key: String,
    pub busy_markers: Vec<String>,
    pub shell: Option<PathBuf>,
    pub tmux_program: String,
    pub multiplexer_call_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("."),
            data_dir: PathBuf::from("data"),
            bind_addr: "127.0.0.1:3000".to_string(),
            command_timeout_secs: 60,
            max_output_chars: 3500,
            capture_lines: 1200,
            settle_poll_ms: 350,
            settle_polls: 2,
            capture_timeout_secs: 20,
            submit_key: "Enter".to_string(),
            newline_key: "C-j".to_string(),
            busy_markers: vec!["esc to interrupt".to_string(), "working (".to_string()],
            shell: None,
            tmux_program: "tmux".to_string(),
            multiplexer_call_timeout_secs: 10,
        }
    }
}

/// Settings consumed by `ShellSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    pub command_timeout: Duration,
    pub max_output_chars: usize,
    /// Shell used for general commands; `None` means detect from `$SHELL`.
    pub shell: Option<PathBuf>,
}

impl Default for ShellConfig {
    fn default() -> Self {
        RelayConfig::default().shell_config()
    }
}

/// Settings consumed by `TerminalBridge`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub capture_lines: usize,
    pub max_output_chars: usize,
    pub poll_interval: Duration,
    /// Consecutive identical captures required to call the pane settled.
    pub settle_polls: u32,
    pub capture_timeout: Duration,
    pub submit_key: String,
    pub newline_key: String,
    pub busy_markers: Vec<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        RelayConfig::default().bridge_config()
    }
}

impl RelayConfig {
    /// Load from the process environment, after reading `.env` if present.
    ///
    /// # Errors
    /// Returns error if a numeric variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "Loaded .env");
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Missing variables keep defaults.
    ///
    /// # Errors
    /// Returns error if a numeric variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut cfg = Self::default();

        if let Some(v) = get("RELAY_WORKSPACE_DIR") {
            cfg.workspace_root = PathBuf::from(v);
        }
        if let Some(v) = get("RELAY_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("RELAY_BIND_ADDR") {
            cfg.bind_addr = v;
        }
        parse_into(&get, "RELAY_COMMAND_TIMEOUT_SECS", &mut cfg.command_timeout_secs)?;
        parse_into(&get, "RELAY_MAX_OUTPUT_CHARS", &mut cfg.max_output_chars)?;
        parse_into(&get, "RELAY_CAPTURE_LINES", &mut cfg.capture_lines)?;
        parse_into(&get, "RELAY_SETTLE_POLL_MS", &mut cfg.settle_poll_ms)?;
        parse_into(&get, "RELAY_SETTLE_POLLS", &mut cfg.settle_polls)?;
        parse_into(&get, "RELAY_CAPTURE_TIMEOUT_SECS", &mut cfg.capture_timeout_secs)?;
        parse_into(&get, "RELAY_TMUX_CALL_TIMEOUT_SECS", &mut cfg.multiplexer_call_timeout_secs)?;
        if let Some(v) = get("RELAY_SUBMIT_KEY") {
            cfg.submit_key = v;
        }
        if let Some(v) = get("RELAY_NEWLINE_KEY") {
            cfg.newline_key = v;
        }
        if let Some(v) = get("RELAY_BUSY_MARKERS") {
            cfg.busy_markers = v
                .split(',')
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect();
        }
        if let Some(v) = get("RELAY_SHELL") {
            cfg.shell = Some(PathBuf::from(v));
        }
        if let Some(v) = get("RELAY_TMUX") {
            cfg.tmux_program = v;
        }

        if cfg.settle_polls == 0 {
            return Err(ConfigError::InvalidValue {
                name: "RELAY_SETTLE_POLLS",
                value: "0".to_string(),
            });
        }
        Ok(cfg)
    }

    /// Canonical workspace root. Fails if the directory does not exist.
    ///
    /// # Errors
    /// Returns error if the root cannot be canonicalized.
    pub fn resolved_workspace_root(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.workspace_root.canonicalize()?)
    }

    #[must_use]
    pub fn shell_config(&self) -> ShellConfig {
        ShellConfig {
            command_timeout: Duration::from_secs(self.command_timeout_secs),
            max_output_chars: self.max_output_chars,
            shell: self.shell.clone(),
        }
    }

    #[must_use]
    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            capture_lines: self.capture_lines,
            max_output_chars: self.max_output_chars,
            poll_interval: Duration::from_millis(self.settle_poll_ms),
            settle_polls: self.settle_polls,
            capture_timeout: Duration::from_secs(self.capture_timeout_secs),
            submit_key: self.submit_key.clone(),
            newline_key: self.newline_key.clone(),
            busy_markers: self.busy_markers.clone(),
        }
    }

    #[must_use]
    pub const fn multiplexer_call_timeout(&self) -> Duration {
        Duration::from_secs(self.multiplexer_call_timeout_secs)
    }
}

fn parse_into<G, T>(get: &G, name: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = get(name) {
        *slot = raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let cfg = RelayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, RelayConfig::default());
        assert_eq!(cfg.bridge_config().submit_key, "Enter");
    }

    #[test]
    fn test_overrides() {
        let cfg = RelayConfig::from_lookup(lookup(&[
            ("RELAY_MAX_OUTPUT_CHARS", "100"),
            ("RELAY_SETTLE_POLL_MS", " 50 "),
            ("RELAY_SUBMIT_KEY", "C-m"),
            ("RELAY_BUSY_MARKERS", "Thinking, ,RUNNING"),
            ("RELAY_SHELL", "/bin/sh"),
        ]))
        .unwrap();

        let bridge = cfg.bridge_config();
        assert_eq!(bridge.max_output_chars, 100);
        assert_eq!(bridge.poll_interval, Duration::from_millis(50));
        assert_eq!(bridge.submit_key, "C-m");
        assert_eq!(bridge.busy_markers, vec!["thinking", "running"]);
        assert_eq!(cfg.shell_config().shell, Some(PathBuf::from("/bin/sh")));
    }

    #[test]
    fn test_invalid_number() {
        let err = RelayConfig::from_lookup(lookup(&[("RELAY_CAPTURE_LINES", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { name: "RELAY_CAPTURE_LINES", .. }));
        assert!(RelayConfig::from_lookup(lookup(&[("RELAY_SETTLE_POLLS", "0")])).is_err());
    }
}
