//! Serialized send/capture against shared panes.

use std::{collections::HashMap, sync::Arc, time::Instant};

use relay_core::{BridgeConfig, CommandResult, PaneDriver, RelayError, TerminalTarget};
use tokio::sync::Mutex;

/// Options for a single `send_and_capture`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SendOptions<'a> {
    /// Type the text but do not press the submit key.
    pub no_submit: bool,
    /// Snapshot returned by the previous capture for this conversation.
    /// When absent, a capture taken before injection is used as the baseline.
    pub previous_snapshot: Option<&'a str>,
}

/// Outcome of a send/capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneCapture {
    /// `captured_pane_text` holds the tail of the pane, `pane_delta` the text
    /// new since the previous snapshot.
    pub result: CommandResult,
    /// Untrimmed capture to hand back as the next `previous_snapshot`.
    pub snapshot: String,
    /// False when the capture timeout elapsed before the pane settled.
    pub settled: bool,
}

/// Serializes sends per target and waits for output to settle.
///
/// A target may be bound to many conversations; all of their sends go
/// through the same per-target lock.
pub struct TerminalBridge {
    driver: Arc<dyn PaneDriver>,
    config: BridgeConfig,
    locks: Mutex<HashMap<TerminalTarget, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for TerminalBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminalBridge").field("config", &self.config).finish_non_exhaustive()
    }
}

impl TerminalBridge {
    #[must_use]
    pub fn new(driver: Arc<dyn PaneDriver>, config: BridgeConfig) -> Self {
        Self {
            driver,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Inject `text` into `target`, wait for the pane to settle and capture it.
    ///
    /// Empty `text` is a pure capture: nothing is sent and no settle wait happens.
    ///
    /// # Errors
    /// `TargetNotFound` if the pane is gone, `BridgeUnavailable` if the
    /// multiplexer cannot be run. Neither is retried.
    pub async fn send_and_capture(
        &self,
        target: &TerminalTarget,
        text: &str,
        options: SendOptions<'_>,
    ) -> Result<PaneCapture, RelayError> {
        let started = Instant::now();
        let lock = self.target_lock(target).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.send_locked(target, text, options, started).await
        };
        self.release_target_lock(target, &lock).await;
        outcome
    }

    async fn send_locked(
        &self,
        target: &TerminalTarget,
        text: &str,
        options: SendOptions<'_>,
        started: Instant,
    ) -> Result<PaneCapture, RelayError> {
        let baseline = match options.previous_snapshot {
            Some(previous) => previous.to_string(),
            None => self.capture_raw(target).await?,
        };

        let text = text.trim_end_matches(['\r', '\n']);
        let (raw, settled) = if text.is_empty() {
            (self.capture_raw(target).await?, true)
        } else {
            self.inject(target, text, options.no_submit).await?;
            self.settle(target).await?
        };

        let (tail, tail_cut) = tail_lines(&raw, self.config.capture_lines, self.config.max_output_chars);
        let (delta, _) = tail_lines(increment(&baseline, &raw), usize::MAX, self.config.max_output_chars);
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        tracing::debug!(
            %target,
            settled,
            truncated = tail_cut,
            delta_chars = delta.chars().count(),
            duration_ms,
            "Pane captured"
        );
        Ok(PaneCapture {
            result: CommandResult::pane(tail, Some(delta), tail_cut, duration_ms),
            snapshot: raw,
            settled,
        })
    }

    async fn target_lock(&self, target: &TerminalTarget) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        Arc::clone(locks.entry(target.clone()).or_default())
    }

    /// Forget the target's lock once no other caller holds or waits on it.
    async fn release_target_lock(&self, target: &TerminalTarget, lock: &Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        let ours = locks.get(target).is_some_and(|entry| Arc::ptr_eq(entry, lock));
        if ours && Arc::strong_count(lock) == 2 {
            locks.remove(target);
        }
    }

    async fn capture_raw(&self, target: &TerminalTarget) -> Result<String, RelayError> {
        self.driver.capture(target, self.config.capture_lines).await
    }

    /// One line at a time, newline key between lines, submit key last.
    async fn inject(&self, target: &TerminalTarget, text: &str, no_submit: bool) -> Result<(), RelayError> {
        for (i, line) in text.split('\n').enumerate() {
            if i > 0 {
                self.driver.send_key(target, &self.config.newline_key).await?;
            }
            let line = line.trim_end_matches('\r');
            if !line.is_empty() {
                self.driver.send_text(target, line).await?;
            }
        }
        if !no_submit {
            self.driver.send_key(target, &self.config.submit_key).await?;
        }
        Ok(())
    }

    /// Poll until `settle_polls` consecutive captures agree and no busy
    /// marker is visible, or until the capture timeout.
    async fn settle(&self, target: &TerminalTarget) -> Result<(String, bool), RelayError> {
        let deadline = Instant::now() + self.config.capture_timeout;
        let mut last = self.capture_raw(target).await?;
        let mut run = 1;

        loop {
            if run >= self.config.settle_polls && !self.is_busy(&last) {
                return Ok((last, true));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                tracing::debug!(%target, "Pane did not settle before timeout");
                return Ok((last, false));
            }
            tokio::time::sleep(self.config.poll_interval.min(remaining)).await;

            let current = self.capture_raw(target).await?;
            if current == last {
                run += 1;
            } else {
                run = 1;
                last = current;
            }
        }
    }

    fn is_busy(&self, text: &str) -> bool {
        if self.config.busy_markers.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.config.busy_markers.iter().any(|m| lower.contains(m.as_str()))
    }
}

/// Text of `new` that follows the longest suffix of `prev` which is also a
/// prefix of `new`. All of `new` when there is no overlap.
#[must_use]
pub fn increment<'a>(prev: &str, new: &'a str) -> &'a str {
    if prev.is_empty() {
        return new;
    }
    let Some(first) = new.chars().next() else {
        return new;
    };
    // Candidate suffixes start with `new`'s first char; earliest is longest.
    prev.match_indices(first)
        .map(|(i, _)| &prev[i..])
        .find(|suffix| new.starts_with(suffix))
        .map_or(new, |overlap| &new[overlap.len()..])
}

/// Keep the last `max_lines` lines (trailing blank lines dropped) and then
/// the last `max_chars` characters. Returns whether anything was cut.
#[must_use]
pub fn tail_lines(text: &str, max_lines: usize, max_chars: usize) -> (String, bool) {
    let trimmed = text.trim_end_matches(|c: char| c == '\n' || c == '\r' || c == ' ');
    let mut cut = false;

    let mut start = 0;
    if max_lines == 0 {
        start = trimmed.len();
        cut = !trimmed.is_empty();
    } else if let Some((idx, _)) = trimmed.rmatch_indices('\n').nth(max_lines - 1) {
        start = idx + 1;
        cut = true;
    }
    let tail = &trimmed[start..];

    let chars = tail.chars().count();
    if chars > max_chars {
        let skip = chars - max_chars;
        let byte = tail.char_indices().nth(skip).map_or(tail.len(), |(i, _)| i);
        return (tail[byte..].to_string(), true);
    }
    (tail.to_string(), cut)
}
