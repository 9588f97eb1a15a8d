//! Per-conversation shell session.

use std::{
    path::{Path, PathBuf},
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use relay_core::{
    CommandResult, ConversationId, EnvStore, PathGuard, RelayError, ShellConfig, WorkspaceContext,
};

use crate::{
    directive::Directive,
    exec::{self, ExecRequest, elapsed_ms},
    shell::{UnixShell, base_env},
};

/// Shell state for one conversation: a working directory clamped to the
/// workspace root plus an environment that persists across commands.
///
/// Each general command runs in a fresh child process; `cd`, `source`,
/// `export` and `unset` are applied to this struct so later commands see them.
#[derive(Debug, Clone)]
pub struct ShellSession {
    conversation_id: ConversationId,
    guard: PathGuard,
    cwd: PathBuf,
    previous_cwd: Option<PathBuf>,
    env: EnvStore,
    initial_env: EnvStore,
    shell: UnixShell,
    config: ShellConfig,
    created_at: i64,
    last_used_at: i64,
}

impl ShellSession {
    /// Create a session rooted at the context's workspace root.
    #[must_use]
    pub fn new(conversation_id: impl Into<ConversationId>, ctx: &WorkspaceContext, config: ShellConfig) -> Self {
        let guard = PathGuard::new(&ctx.root);
        let timestamp = now();
        Self {
            conversation_id: conversation_id.into(),
            cwd: guard.root().to_path_buf(),
            guard,
            previous_cwd: None,
            env: ctx.initial_env.clone(),
            initial_env: ctx.initial_env.clone(),
            shell: UnixShell::select(config.shell.as_deref()),
            config,
            created_at: timestamp,
            last_used_at: timestamp,
        }
    }

    #[must_use]
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    #[must_use]
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    #[must_use]
    pub const fn env(&self) -> &EnvStore {
        &self.env
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        self.guard.root()
    }

    #[must_use]
    pub const fn created_at(&self) -> i64 {
        self.created_at
    }

    #[must_use]
    pub const fn last_used_at(&self) -> i64 {
        self.last_used_at
    }

    /// Execute one command line.
    ///
    /// Never fails: directive errors and launch failures come back as a
    /// `CommandResult` with `error` set and the session state unchanged.
    pub async fn run(&mut self, line: &str) -> CommandResult {
        let started = Instant::now();
        self.last_used_at = now();
        self.recover_cwd();

        let outcome = match Directive::parse(line, &self.env) {
            Ok(Directive::ChangeDir(arg)) => self
                .change_dir(arg.as_deref())
                .map(|_| CommandResult::message(String::new(), 0)),
            Ok(Directive::Source(path)) => self.source(&path).map(|count| {
                CommandResult::message(format!("Applied {count} variable(s) from {path}\n"), 0)
            }),
            Ok(Directive::Export(pairs)) => {
                tracing::debug!(conversation_id = %self.conversation_id, count = pairs.len(), "export");
                self.env.merge(pairs);
                Ok(CommandResult::message(String::new(), 0))
            }
            Ok(Directive::Unset(names)) => {
                tracing::debug!(conversation_id = %self.conversation_id, ?names, "unset");
                for name in &names {
                    self.env.unset(name);
                }
                Ok(CommandResult::message(String::new(), 0))
            }
            Ok(Directive::Run(command)) => self.spawn(command).await,
            Err(e) => Err(e),
        };

        let mut result = outcome.unwrap_or_else(|e| {
            tracing::debug!(conversation_id = %self.conversation_id, error = %e, "Directive failed");
            e.into_result(0)
        });
        result.duration_ms = elapsed_ms(started);
        result
    }

    /// Change directory. `None`, `~` mean the workspace root; `-` means the
    /// previous directory.
    ///
    /// # Errors
    /// `PathEscape` if the target leaves the workspace, `NoSuchDirectory` if it
    /// is not an existing directory. The cwd is unchanged on error.
    pub fn change_dir(&mut self, arg: Option<&str>) -> Result<&Path, RelayError> {
        let target = match arg {
            None | Some("~" | "") => self.guard.root().to_path_buf(),
            Some("-") => self
                .previous_cwd
                .clone()
                .ok_or_else(|| RelayError::InvalidDirective("cd: OLDPWD not set".into()))?,
            Some(path) => {
                let relative = path.strip_prefix("~/").map_or(path, |p| p.trim_start_matches('/'));
                let base = if relative.len() == path.len() { &self.cwd } else { self.guard.root() };
                self.guard.resolve(base, relative)?
            }
        };
        let display = arg.unwrap_or("~").to_string();
        if !target.is_dir() {
            return Err(RelayError::NoSuchDirectory { path: display });
        }
        if !self.guard.is_inside_canonical(&target) {
            return Err(RelayError::PathEscape { path: display });
        }

        tracing::debug!(conversation_id = %self.conversation_id, cwd = %target.display(), "cd");
        self.previous_cwd = Some(std::mem::replace(&mut self.cwd, target));
        Ok(&self.cwd)
    }

    /// Parse a script and merge its assignments into the session env.
    ///
    /// Returns the number of variables applied.
    ///
    /// # Errors
    /// `PathEscape` if the script lies outside the workspace, `SourceFile` if it
    /// cannot be read. The env is unchanged on error.
    pub fn source(&mut self, path: &str) -> Result<usize, RelayError> {
        let resolved = self.guard.resolve(&self.cwd, path)?;
        if resolved.exists() && !self.guard.is_inside_canonical(&resolved) {
            return Err(RelayError::PathEscape { path: path.to_string() });
        }
        let pairs = EnvStore::source_script(&resolved, &self.child_env()).map_err(|source| RelayError::SourceFile {
            path: path.to_string(),
            source,
        })?;
        let count = pairs.len();
        tracing::debug!(conversation_id = %self.conversation_id, script = %resolved.display(), count, "source");
        self.env.merge(pairs);
        Ok(count)
    }

    /// Restore cwd to the workspace root and env to the initial snapshot.
    pub fn reset(&mut self) {
        self.cwd = self.guard.root().to_path_buf();
        self.previous_cwd = None;
        self.env = self.initial_env.clone();
        self.last_used_at = now();
    }

    /// Apply persisted state. A cwd that no longer exists or lies outside the
    /// workspace falls back to the root.
    pub fn restore(&mut self, cwd: &Path, env: EnvStore, created_at: i64, last_used_at: i64) {
        self.cwd = if cwd.is_dir() && self.guard.is_inside(cwd) && self.guard.is_inside_canonical(cwd) {
            cwd.to_path_buf()
        } else {
            self.guard.root().to_path_buf()
        };
        self.env = env;
        if created_at > 0 {
            self.created_at = created_at;
        }
        self.last_used_at = last_used_at.max(self.created_at);
    }

    /// Environment a child sees: base variables, then the session env, then `PWD`.
    fn child_env(&self) -> EnvStore {
        let mut env: EnvStore = base_env().into_iter().collect();
        env.merge(self.env.iter());
        env.set("PWD", self.cwd.to_string_lossy());
        env
    }

    async fn spawn(&self, command: &str) -> Result<CommandResult, RelayError> {
        let env = self
            .child_env()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let result = exec::run(ExecRequest {
            shell: &self.shell,
            line: command,
            cwd: &self.cwd,
            env,
            timeout: self.config.command_timeout,
            max_output_chars: self.config.max_output_chars,
        })
        .await?;
        tracing::debug!(
            conversation_id = %self.conversation_id,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            truncated = result.truncated,
            "Command finished"
        );
        Ok(result)
    }

    /// The cwd may have been deleted by a collaborator since the last command.
    fn recover_cwd(&mut self) {
        if !self.cwd.is_dir() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                cwd = %self.cwd.display(),
                "Working directory vanished, returning to workspace root"
            );
            self.cwd = self.guard.root().to_path_buf();
            self.previous_cwd = None;
        }
    }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use relay_core::ErrorKind;
    use tempfile::TempDir;

    use super::*;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        session: ShellSession,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();
        std::fs::create_dir_all(root.join("sub/deeper")).unwrap();
        let env: EnvStore = [("KEEP", "kept"), ("PATH", "/usr/bin:/bin")].into_iter().collect();
        let ctx = WorkspaceContext::with_env(root.clone(), env);
        let config = ShellConfig {
            command_timeout: Duration::from_secs(10),
            max_output_chars: 1000,
            shell: Some(PathBuf::from("/bin/sh")),
        };
        Fixture {
            _dir: dir,
            session: ShellSession::new("chat-1", &ctx, config),
            root,
        }
    }

    #[tokio::test]
    async fn test_cd_navigation_and_escape() {
        let mut f = fixture();
        let s = &mut f.session;

        let r = s.run("cd sub").await;
        assert_eq!(r.exit_code, Some(0));
        assert_eq!(s.cwd(), f.root.join("sub"));

        s.run("cd ..").await;
        assert_eq!(s.cwd(), f.root);

        let r = s.run("cd ../../etc").await;
        assert_eq!(r.error, Some(ErrorKind::PathEscape));
        assert_eq!(r.exit_code, Some(1));
        assert_eq!(s.cwd(), f.root);
    }

    #[tokio::test]
    async fn test_cd_variants() {
        let mut f = fixture();
        let s = &mut f.session;

        s.run("cd sub/deeper").await;
        s.run("cd").await;
        assert_eq!(s.cwd(), f.root);

        s.run("cd -").await;
        assert_eq!(s.cwd(), f.root.join("sub/deeper"));

        s.run("cd /sub").await;
        assert_eq!(s.cwd(), f.root.join("sub"));

        s.run("cd ~/sub/deeper").await;
        assert_eq!(s.cwd(), f.root.join("sub/deeper"));

        let r = s.run("cd missing").await;
        assert_eq!(r.error, Some(ErrorKind::NoSuchDirectory));
        assert!(r.stderr.unwrap().contains("missing"));
        assert_eq!(s.cwd(), f.root.join("sub/deeper"));
    }

    #[tokio::test]
    async fn test_cd_onto_file_fails() {
        let mut f = fixture();
        std::fs::write(f.root.join("file.txt"), "x").unwrap();
        let r = f.session.run("cd file.txt").await;
        assert_eq!(r.error, Some(ErrorKind::NoSuchDirectory));
        assert_eq!(f.session.cwd(), f.root);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cd_through_symlink_out_is_rejected() {
        let mut f = fixture();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), f.root.join("out")).unwrap();
        let r = f.session.run("cd out").await;
        assert_eq!(r.error, Some(ErrorKind::PathEscape));
        assert_eq!(f.session.cwd(), f.root);
    }

    #[tokio::test]
    async fn test_commands_run_in_cwd() {
        let mut f = fixture();
        f.session.run("cd sub").await;
        let r = f.session.run("pwd").await;
        assert_eq!(r.stdout.trim(), f.root.join("sub").to_string_lossy());
    }

    #[tokio::test]
    async fn test_export_persists_until_unset() {
        let mut f = fixture();
        let s = &mut f.session;

        let r = s.run("export NAME=VALUE").await;
        assert!(r.is_success());
        assert_eq!(s.run("echo \"$NAME\"").await.stdout, "VALUE\n");
        assert_eq!(s.run("printenv NAME").await.stdout, "VALUE\n");

        s.run("unset NAME").await;
        assert_eq!(s.run("echo \"[$NAME]\"").await.stdout, "[]\n");
        assert!(!s.env().contains("NAME"));
    }

    #[tokio::test]
    async fn test_export_then_reset() {
        let mut f = fixture();
        let s = &mut f.session;
        s.run("export NAME=VALUE").await;
        s.run("cd sub").await;
        s.reset();
        assert_eq!(s.cwd(), f.root);
        assert_eq!(s.run("echo \"[$NAME]\"").await.stdout, "[]\n");
        assert_eq!(s.env().get("KEEP"), Some("kept"));
        s.reset();
        assert_eq!(s.cwd(), f.root);
    }

    #[tokio::test]
    async fn test_invalid_export_leaves_env() {
        let mut f = fixture();
        let before = f.session.env().clone();
        let r = f.session.run("export =oops").await;
        assert_eq!(r.error, Some(ErrorKind::InvalidDirective));
        assert_eq!(f.session.env(), &before);
    }

    #[tokio::test]
    async fn test_source_merges_pairs() {
        let mut f = fixture();
        std::fs::write(f.root.join("sub/vars.env"), "export A=1\nB=2\n# comment\n").unwrap();
        let s = &mut f.session;
        s.run("cd sub").await;

        let r = s.run("source vars.env").await;
        assert_eq!(r.exit_code, Some(0));
        assert!(r.stdout.contains("Applied 2"));
        assert_eq!(s.env().get("A"), Some("1"));
        assert_eq!(s.env().get("B"), Some("2"));
        assert_eq!(s.env().get("KEEP"), Some("kept"));
        assert_eq!(s.run("echo $A$B").await.stdout, "12\n");
    }

    #[tokio::test]
    async fn test_source_activate_script_keeps_path_usable() {
        let mut f = fixture();
        std::fs::create_dir_all(f.root.join(".venv/bin")).unwrap();
        std::fs::write(
            f.root.join("activate"),
            "VIRTUAL_ENV=\"$PWD/.venv\"\nexport PATH=\"$VIRTUAL_ENV/bin:$PATH\"\n",
        )
        .unwrap();
        let s = &mut f.session;

        let r = s.run("source activate").await;
        assert_eq!(r.exit_code, Some(0));
        let venv = f.root.join(".venv").display().to_string();
        assert_eq!(s.env().get("VIRTUAL_ENV"), Some(venv.as_str()));
        assert_eq!(s.env().get("PATH"), Some(format!("{venv}/bin:/usr/bin:/bin").as_str()));

        let r = s.run("ls").await;
        assert_eq!(r.exit_code, Some(0));
        assert!(r.stdout.contains("activate"));
    }

    #[tokio::test]
    async fn test_source_failures() {
        let mut f = fixture();
        let before = f.session.env().clone();

        let r = f.session.run(". nope.env").await;
        assert_eq!(r.error, Some(ErrorKind::SourceFile));
        assert_ne!(r.exit_code, Some(0));

        let r = f.session.run("source ../../etc/profile").await;
        assert_eq!(r.error, Some(ErrorKind::PathEscape));
        assert_eq!(f.session.env(), &before);
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_failed() {
        let mut f = fixture();
        let r = f.session.run("ls does-not-exist").await;
        assert!(r.error.is_none());
        assert_ne!(r.exit_code, Some(0));
        assert!(!r.stderr.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_compound_cd_does_not_persist() {
        let mut f = fixture();
        let r = f.session.run("cd sub && pwd").await;
        assert!(r.stdout.trim().ends_with("sub"));
        assert_eq!(f.session.cwd(), f.root);
    }

    #[tokio::test]
    async fn test_vanished_cwd_recovers() {
        let mut f = fixture();
        f.session.run("cd sub/deeper").await;
        std::fs::remove_dir_all(f.root.join("sub")).unwrap();
        let r = f.session.run("pwd").await;
        assert_eq!(r.stdout.trim(), f.root.to_string_lossy());
    }

    #[test]
    fn test_restore_clamps() {
        let mut f = fixture();
        let env: EnvStore = [("X", "1")].into_iter().collect();
        f.session.restore(Path::new("/"), env.clone(), 10, 20);
        assert_eq!(f.session.cwd(), f.root);
        assert_eq!(f.session.env(), &env);
        assert_eq!(f.session.created_at(), 10);

        f.session.restore(&f.root.join("sub"), EnvStore::new(), 0, 0);
        assert_eq!(f.session.cwd(), f.root.join("sub"));
    }
}
