//! Shell detection and base environment for child commands.

use std::{
    collections::HashSet,
    env::{join_paths, split_paths},
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
};

/// PATH used when neither the session nor the host provides one.
const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Host variables a shell needs to function, re-supplied under the session env.
const BASE_VARS: &[&str] = &["PATH", "HOME", "USER", "LOGNAME", "SHELL", "LANG", "TMPDIR"];

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Zsh(PathBuf),
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Zsh(p) | Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Get the current shell from `$SHELL`, falling back to `/bin/sh`.
    #[must_use]
    pub fn current_shell() -> Self {
        std::env::var("SHELL")
            .ok()
            .and_then(|shell| Self::from_path(Path::new(&shell)))
            .unwrap_or_else(|| Self::Sh(PathBuf::from("/bin/sh")))
    }

    /// Pick the configured shell if it exists, otherwise the current one.
    #[must_use]
    pub fn select(configured: Option<&Path>) -> Self {
        if let Some(path) = configured {
            if let Some(shell) = Self::from_path(path) {
                return shell;
            }
            tracing::warn!(shell = %path.display(), "Configured shell not found, using $SHELL");
        }
        Self::current_shell()
    }

    /// Create from an absolute path to an existing file.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        Some(match path.file_name().and_then(OsStr::to_str) {
            Some("zsh") => Self::Zsh(path_buf),
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        })
    }

    /// Get `(program, flag)` for running a command line.
    #[must_use]
    pub fn get_shell_command(&self) -> (String, &'static str) {
        (self.path().to_string_lossy().into_owned(), "-c")
    }
}

/// Resolve an executable by name.
///
/// Absolute paths are accepted as-is if they exist; bare names are looked
/// up on the process PATH.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }
    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Merge two PATH strings into a single, de-duplicated PATH.
#[must_use]
pub fn merge_paths(primary: impl AsRef<OsStr>, secondary: impl AsRef<OsStr>) -> OsString {
    let mut seen = HashSet::<PathBuf>::new();
    let mut merged = Vec::<PathBuf>::new();

    for p in split_paths(primary.as_ref()).chain(split_paths(secondary.as_ref())) {
        if !p.as_os_str().is_empty() && seen.insert(p.clone()) {
            merged.push(p);
        }
    }

    join_paths(merged).unwrap_or_default()
}

/// Minimal host variables a child shell needs.
///
/// `PATH` always includes the standard system directories; `HOME` falls back
/// to the user's home directory and `TERM` is forced to `dumb` since output
/// is captured rather than rendered.
#[must_use]
pub fn base_env() -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = BASE_VARS
        .iter()
        .filter_map(|name| Some(((*name).to_string(), std::env::var(name).ok()?)))
        .collect();

    let host_path = std::env::var_os("PATH").unwrap_or_default();
    let path = merge_paths(host_path, FALLBACK_PATH)
        .to_string_lossy()
        .into_owned();
    upsert(&mut vars, "PATH", path);

    if !vars.iter().any(|(k, _)| k == "HOME") {
        if let Some(home) = dirs::home_dir() {
            upsert(&mut vars, "HOME", home.to_string_lossy().into_owned());
        }
    }
    upsert(&mut vars, "TERM", "dumb".to_string());
    vars
}

fn upsert(vars: &mut Vec<(String, String)>, name: &str, value: String) {
    match vars.iter_mut().find(|(k, _)| k == name) {
        Some((_, v)) => *v = value,
        None => vars.push((name.to_string(), value)),
    }
}
