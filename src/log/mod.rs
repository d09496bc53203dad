//! Structured session log — JSON lines per project.
//!
//! Every coordination session appends to `.oprime/logs/session.jsonl`
//! capturing state changes, advisory calls, instruction writes, result
//! deliveries, and summarization runs. Each line is a self-contained JSON
//! object with a timestamp, easy to grep, stream, and post-process.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

/// A structured event in the session log.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// ISO 8601 timestamp.
    pub timestamp: String,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// All event types that can appear in the session log.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
#[serde(rename_all = "snake_case")]
pub enum LogEvent {
    /// A task was started (or restarted) with a goal.
    TaskStarted { goal: String },
    /// The machine transitioned.
    StateChanged { from: String, to: String },
    /// An advisory call was dispatched.
    AdvisoryCalled { prompt_chars: usize },
    /// The advisory response was classified.
    AdvisoryResponded { directive: String },
    /// An instruction was written to the channel.
    InstructionWritten { chars: usize },
    /// A result file was delivered and folded into the history.
    ResultReceived { report: String, chars: usize },
    /// The result watch timed out.
    ResultTimedOut { waited_secs: u64 },
    /// A summarization pass finished.
    SummarizationRun { compacted_turns: usize, ok: bool },
    /// User input resumed a paused session.
    UserInput { chars: usize },
    /// The session was stopped by the user.
    SessionStopped,
}

/// Writer for JSON lines session logs.
pub struct SessionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl SessionLog {
    /// Open the session log for appending, creating file and parent
    /// directories if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file: {}", path.display()))?;

        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    /// Log an event. Failures to write the log are surfaced to the caller,
    /// who may treat them as non-fatal.
    pub fn log(&self, event: LogEvent) -> Result<()> {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event,
        };
        let json = serde_json::to_string(&entry).context("failed to serialize log entry")?;

        debug!(event = %json, "session log");

        let mut writer = self.writer.lock().unwrap();
        writeln!(writer, "{json}").context("failed to write log entry")?;
        writer.flush().context("failed to flush log")?;
        Ok(())
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
