//! Child-process execution with output budget and timeout.

use std::{
    path::Path,
    process::{ExitStatus, Stdio},
    time::{Duration, Instant},
};

use command_group::{AsyncCommandGroup, AsyncGroupChild};
use relay_core::{CommandResult, ErrorKind, RelayError};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
};

use crate::shell::UnixShell;

/// How long to keep draining pipes after the shell exits before the
/// process group is killed (background children can hold them open).
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A command line ready to run in a child shell.
#[derive(Debug)]
pub struct ExecRequest<'a> {
    pub shell: &'a UnixShell,
    pub line: &'a str,
    pub cwd: &'a Path,
    /// Full child environment; the child inherits nothing else.
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub max_output_chars: usize,
}

/// Run the request to completion or timeout.
///
/// Nonzero exit is not an error; it is reported in `exit_code`. On timeout
/// the whole process group is killed and whatever was captured is returned.
///
/// # Errors
/// Returns `RelayError::InternalExecution` if the shell cannot be spawned.
pub async fn run(req: ExecRequest<'_>) -> Result<CommandResult, RelayError> {
    let started = Instant::now();
    let (program, flag) = req.shell.get_shell_command();

    let mut cmd = Command::new(&program);
    cmd.arg(flag)
        .arg(req.line)
        .current_dir(req.cwd)
        .env_clear()
        .envs(req.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .group_spawn()
        .map_err(|e| RelayError::InternalExecution(format!("{program}: {e}")))?;

    // Enough bytes to hold `max_output_chars` of any encoding.
    let byte_cap = req.max_output_chars.saturating_mul(4).saturating_add(4);
    let stdout_task = spawn_reader(child.inner().stdout.take(), byte_cap);
    let stderr_task = spawn_reader(child.inner().stderr.take(), byte_cap);

    let (status, timed_out) = match tokio::time::timeout(req.timeout, child.wait()).await {
        Ok(Ok(status)) => (Some(status), false),
        Ok(Err(e)) => {
            kill_group(&mut child).await;
            return Err(RelayError::InternalExecution(e.to_string()));
        }
        Err(_) => {
            tracing::warn!(cwd = %req.cwd.display(), timeout_secs = req.timeout.as_secs_f64(), "Command timed out");
            kill_group(&mut child).await;
            (None, true)
        }
    };

    let (stdout, stdout_over) = drain(stdout_task, &mut child).await;
    let (stderr, stderr_over) = drain(stderr_task, &mut child).await;

    let (stdout, stdout_cut) = truncate_head(&String::from_utf8_lossy(&stdout), req.max_output_chars);
    let (mut stderr, stderr_cut) = truncate_head(&String::from_utf8_lossy(&stderr), req.max_output_chars);

    let mut result = CommandResult {
        exit_code: status.map(exit_code),
        stdout,
        truncated: stdout_over || stdout_cut || stderr_over || stderr_cut,
        ..CommandResult::default()
    };
    if timed_out {
        let err = RelayError::CommandTimeout { timeout: req.timeout };
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!("[{err}]\n"));
        result.exit_code = err.exit_code();
        result.error = Some(ErrorKind::CommandTimeout);
    }
    result.stderr = Some(stderr);
    result.duration_ms = elapsed_ms(started);
    Ok(result)
}

/// Keep the first `max_chars` characters.
#[must_use]
pub fn truncate_head(text: &str, max_chars: usize) -> (String, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

async fn kill_group(child: &mut AsyncGroupChild) {
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "Process group already gone");
    }
    let _ = child.wait().await;
}

type ReadTask = JoinHandle<(Vec<u8>, bool)>;

fn spawn_reader<R>(reader: Option<R>, cap: usize) -> Option<ReadTask>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    reader.map(|r| tokio::spawn(read_capped(r, cap)))
}

/// Read to EOF, keeping at most `cap` bytes. Returns whether bytes were dropped.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, cap: usize) -> (Vec<u8>, bool) {
    let mut kept = Vec::new();
    let mut overflow = false;
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let room = cap.saturating_sub(kept.len());
                kept.extend_from_slice(&buf[..n.min(room)]);
                overflow |= n > room;
            }
        }
    }
    (kept, overflow)
}

async fn drain(task: Option<ReadTask>, child: &mut AsyncGroupChild) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };
    if let Ok(joined) = tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        return joined.unwrap_or_default();
    }
    // Pipe held open by a background descendant.
    kill_group(child).await;
    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(joined) => joined.unwrap_or_default(),
        Err(_) => {
            task.abort();
            (Vec::new(), true)
        }
    }
}
