//! The instruction/result file pair, wrapped as a request/response primitive.
//!
//! The coordinator writes one instruction file and waits for the executor to
//! write one result file. Neither side holds locks, so the channel has to
//! tolerate stale leftovers from a previous cycle, partially written results,
//! and an executor that never answers. Watching is a background polling
//! thread that delivers exactly one outcome through a caller-supplied
//! callback, then exits.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::config::PathSettings;
use crate::paths;

/// File name the executor polls for new instructions.
pub const INSTRUCTION_FILE: &str = "next_step.txt";
/// File name the executor writes its step output to.
pub const RESULT_FILE: &str = "step_output.txt";

/// Timing knobs for a watch.
#[derive(Debug, Clone, Copy)]
pub struct WatchTiming {
    /// Overall bound; the watch reports a timeout when it elapses with no
    /// qualifying result.
    pub timeout: Duration,
    /// How often the result file is stat'ed while absent or stale.
    pub poll_interval: Duration,
    /// A sighted result must hold the same mtime and size for this long
    /// before it is read, folding rapid successive writes into one delivery.
    pub debounce: Duration,
}

/// What a watch delivered. Exactly one of these per watch, tagged with the
/// generation the watch was started under so superseded watches can be told
/// apart from live ones.
#[derive(Debug)]
pub enum WatchOutcome {
    /// The result file appeared (or was rewritten) after the instruction was
    /// sent; `content` is its full text.
    Ready { generation: u64, content: String },
    /// No qualifying result within the timeout.
    TimedOut { generation: u64 },
    /// The result file appeared but could not be read.
    Failed { generation: u64, error: String },
}

impl WatchOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            WatchOutcome::Ready { generation, .. }
            | WatchOutcome::TimedOut { generation }
            | WatchOutcome::Failed { generation, .. } => *generation,
        }
    }
}

/// Handle to an in-flight watch.
///
/// `cancel` is synchronous: it joins the watcher thread, so once it returns
/// no further outcome will be emitted. An outcome already delivered before
/// cancel carries its generation and is dropped by the consumer.
pub struct WatchHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatchHandle {
    /// Stop the watch without filesystem side effects. Idempotent.
    pub fn cancel(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                warn!("result watcher thread panicked");
            }
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// The instruction/result file pair for one project workspace.
pub struct ResultChannel {
    instruction_path: PathBuf,
    result_path: PathBuf,
    processed_dir: PathBuf,
    /// mtime of the last successfully written instruction; results older
    /// than this are leftovers from a previous cycle.
    sent_at: Option<SystemTime>,
}

impl ResultChannel {
    pub fn new(workspace_root: &Path, settings: &PathSettings) -> Self {
        let logs_dir = workspace_root.join(&settings.logs_dir);
        Self {
            instruction_path: workspace_root
                .join(&settings.instructions_dir)
                .join(INSTRUCTION_FILE),
            result_path: logs_dir.join(RESULT_FILE),
            processed_dir: logs_dir.join("processed"),
            sent_at: None,
        }
    }

    pub fn instruction_path(&self) -> &Path {
        &self.instruction_path
    }

    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    /// Overwrite the instruction file atomically and record the send time.
    pub fn send_instruction(&mut self, text: &str) -> Result<()> {
        paths::write_atomic(&self.instruction_path, text)?;
        let mtime = std::fs::metadata(&self.instruction_path)
            .and_then(|m| m.modified())
            .with_context(|| {
                format!(
                    "failed to stat instruction file: {}",
                    self.instruction_path.display()
                )
            })?;
        self.sent_at = Some(mtime);
        debug!(path = %self.instruction_path.display(), chars = text.len(), "instruction written");
        Ok(())
    }

    /// Start watching for a result newer than the last sent instruction.
    ///
    /// The watcher polls the result file's metadata; once a result with an
    /// mtime at or after the instruction's is stable for one debounce
    /// interval, its content is read and delivered. At most one outcome is
    /// emitted per watch.
    pub fn watch<F>(&self, generation: u64, timing: WatchTiming, deliver: F) -> Result<WatchHandle>
    where
        F: FnOnce(WatchOutcome) + Send + 'static,
    {
        let sent_at = self
            .sent_at
            .context("cannot watch for a result before an instruction was sent")?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread = std::thread::Builder::new()
            .name("result-watch".to_string())
            .spawn({
                let stop = Arc::clone(&stop);
                let result_path = self.result_path.clone();
                move || watch_loop(&result_path, sent_at, generation, timing, &stop, deliver)
            })
            .context("failed to spawn result watcher thread")?;

        Ok(WatchHandle {
            stop,
            thread: Some(thread),
        })
    }

    /// Move the consumed result file into `processed/` with a timestamped
    /// name, mirroring how the executor side keeps its own archive.
    pub fn archive_result(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.processed_dir).with_context(|| {
            format!(
                "failed to create processed dir: {}",
                self.processed_dir.display()
            )
        })?;
        let ts = chrono::Utc::now().format("%Y%m%d_%H%M%S_%f");
        let target = self.processed_dir.join(format!("step_output_{ts}.txt"));
        std::fs::rename(&self.result_path, &target).with_context(|| {
            format!(
                "failed to archive result file: {}",
                self.result_path.display()
            )
        })?;
        debug!(archived = %target.display(), "result file archived");
        Ok(target)
    }
}

fn watch_loop<F>(
    result_path: &Path,
    sent_at: SystemTime,
    generation: u64,
    timing: WatchTiming,
    stop: &AtomicBool,
    deliver: F,
) where
    F: FnOnce(WatchOutcome),
{
    let deadline = Instant::now() + timing.timeout;
    // Last sighted (mtime, len) of a qualifying result; delivery waits until
    // it survives one debounce interval unchanged.
    let mut candidate: Option<(SystemTime, u64)> = None;

    loop {
        if stop.load(Ordering::Relaxed) {
            return;
        }

        match std::fs::metadata(result_path) {
            Ok(meta) => {
                let mtime = meta.modified().unwrap_or(UNIX_EPOCH);
                if mtime >= sent_at {
                    let seen = (mtime, meta.len());
                    if candidate == Some(seen) {
                        if stop.load(Ordering::Relaxed) {
                            return;
                        }
                        match std::fs::read_to_string(result_path) {
                            Ok(content) => deliver(WatchOutcome::Ready {
                                generation,
                                content,
                            }),
                            Err(e) => deliver(WatchOutcome::Failed {
                                generation,
                                error: format!(
                                    "failed to read result file {}: {e}",
                                    result_path.display()
                                ),
                            }),
                        }
                        return;
                    }
                    candidate = Some(seen);
                } else {
                    // Leftover from a previous cycle; keep waiting.
                    candidate = None;
                }
            }
            Err(_) => candidate = None,
        }

        if Instant::now() >= deadline {
            if !stop.load(Ordering::Relaxed) {
                deliver(WatchOutcome::TimedOut { generation });
            }
            return;
        }

        let nap = if candidate.is_some() {
            timing.debounce
        } else {
            timing.poll_interval
        };
        std::thread::sleep(nap);
    }
}
