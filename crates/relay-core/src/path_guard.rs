//! Workspace-root path clamping.

use std::path::{Component, Path, PathBuf};

use crate::RelayError;

/// Resolves user-supplied paths and keeps them inside a workspace root.
///
/// Resolution is lexical: `.` and `..` are folded without touching the
/// filesystem. Absolute user paths are re-rooted under the workspace root,
/// never trusted as real filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGuard {
    root: PathBuf,
}

impl PathGuard {
    /// Create a guard for the given root. The root is normalized lexically.
    #[must_use]
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: normalize(root.as_ref()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `user_path` against `cwd` (or against the root when absolute).
    ///
    /// # Errors
    /// Returns `RelayError::PathEscape` if the normalized result lies outside the root.
    pub fn resolve(&self, cwd: &Path, user_path: &str) -> Result<PathBuf, RelayError> {
        let candidate = if Path::new(user_path).is_absolute() {
            self.root.join(user_path.trim_start_matches('/'))
        } else {
            cwd.join(user_path)
        };
        let resolved = normalize(&candidate);
        if self.is_inside(&resolved) {
            Ok(resolved)
        } else {
            Err(RelayError::PathEscape {
                path: user_path.to_string(),
            })
        }
    }

    /// Pure containment check. The root itself counts as inside.
    #[must_use]
    pub fn is_inside(&self, candidate: &Path) -> bool {
        normalize(candidate).starts_with(&self.root)
    }

    /// Containment check after resolving symlinks on both sides.
    ///
    /// Returns `false` when either path cannot be canonicalized.
    #[must_use]
    pub fn is_inside_canonical(&self, candidate: &Path) -> bool {
        match (self.root.canonicalize(), candidate.canonicalize()) {
            (Ok(root), Ok(path)) => path.starts_with(root),
            _ => false,
        }
    }
}

/// Fold `.` and `..` components without consulting the filesystem.
///
/// `..` at the filesystem root stays at the root.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push(p.as_os_str()),
            Component::RootDir => out.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !matches!(out.components().next_back(), None | Some(Component::RootDir)) {
                    out.pop();
                }
            }
            Component::Normal(part) => out.push(part),
        }
    }
    out
}
