//! Per-project session state and its on-disk snapshot.
//!
//! Exactly one session is live per coordinator process. The snapshot under
//! `.oprime/state.json` carries everything needed to resume a session after
//! a restart: status, full turn history, rolling summary, last instruction,
//! and the summarization counters/thresholds the session was created with.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::paths;
use crate::store::{ConversationStore, HistoryLimits};

/// Failure classes the machine can land in. Each is terminal for the attempt
/// and recoverable by an explicit user action, never by automatic retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Instruction/result file read or write failed.
    #[error("io")]
    Io,
    /// No result arrived within the configured bound.
    #[error("timeout")]
    Timeout,
    /// The advisory backend call failed or reported its own failure.
    #[error("advisory_api")]
    AdvisoryApi,
    /// The result file or advisory response was empty/unusable.
    #[error("malformed_result")]
    MalformedResult,
}

/// The session state machine's states. One sum type with an `Error` variant
/// carrying kind + message, rather than an enum case per failure mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    ProjectSelected,
    CallingAdvisory,
    AwaitingResult,
    ProcessingResult,
    PausedAwaitingUserInput { question: String },
    Summarizing,
    TaskComplete,
    Error { kind: ErrorKind, message: String },
}

impl SessionStatus {
    /// States the engine loop keeps driving through; everything else is
    /// settled until the next user command.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionStatus::CallingAdvisory
                | SessionStatus::AwaitingResult
                | SessionStatus::ProcessingResult
                | SessionStatus::Summarizing
        )
    }

    /// States from which `start_task` may begin a (new) attempt.
    pub fn can_start_task(&self) -> bool {
        matches!(
            self,
            SessionStatus::Idle
                | SessionStatus::ProjectSelected
                | SessionStatus::TaskComplete
                | SessionStatus::Error { .. }
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::ProjectSelected => write!(f, "project selected"),
            SessionStatus::CallingAdvisory => write!(f, "calling advisory"),
            SessionStatus::AwaitingResult => write!(f, "awaiting executor result"),
            SessionStatus::ProcessingResult => write!(f, "processing result"),
            SessionStatus::PausedAwaitingUserInput { question } => {
                write!(f, "paused, awaiting user input: {question}")
            }
            SessionStatus::Summarizing => write!(f, "summarizing history"),
            SessionStatus::TaskComplete => write!(f, "task complete"),
            SessionStatus::Error { kind, message } => write!(f, "error ({kind}): {message}"),
        }
    }
}

/// Live state of one session. Mutated exclusively by the engine; persisted
/// after every finalized transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub project_id: Uuid,
    pub status: SessionStatus,
    pub store: ConversationStore,
    /// Most recent content successfully written to the instruction channel.
    pub last_instruction: Option<String>,
    /// Whether the workspace overview has been sent since the last
    /// compaction (compaction may drop the turn that carried it).
    pub overview_sent: bool,
    pub limits: HistoryLimits,
}

impl SessionState {
    pub fn new(project_id: Uuid, limits: HistoryLimits) -> Self {
        Self {
            project_id,
            status: SessionStatus::ProjectSelected,
            store: ConversationStore::default(),
            last_instruction: None,
            overview_sent: false,
            limits,
        }
    }

    /// Load the snapshot for a workspace, or initialize fresh state.
    ///
    /// Mid-flight statuses cannot be resumed directly (their pending watch or
    /// advisory call died with the previous process) and degrade to
    /// `ProjectSelected`; paused, terminal, and error statuses survive.
    pub fn load(workspace_root: &Path, project_id: Uuid, limits: HistoryLimits) -> Result<Self> {
        let path = paths::snapshot_path(workspace_root);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no snapshot, starting fresh session state");
                return Ok(Self::new(project_id, limits));
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read {}", path.display()));
            }
        };

        let mut state: SessionState = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse snapshot {}", path.display()))?;

        if state.status.is_active() {
            warn!(
                status = %state.status,
                "snapshot captured a mid-flight status; degrading to project selected"
            );
            state.status = SessionStatus::ProjectSelected;
        }
        Ok(state)
    }

    /// Persist the snapshot atomically.
    pub fn save(&self, workspace_root: &Path) -> Result<()> {
        let path = paths::snapshot_path(workspace_root);
        let json = serde_json::to_string_pretty(self).context("failed to serialize snapshot")?;
        paths::write_atomic(&path, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Turn, TurnSender};

    fn state() -> SessionState {
        SessionState::new(Uuid::new_v4(), HistoryLimits::default())
    }

    #[test]
    fn fresh_state_starts_project_selected() {
        let s = state();
        assert_eq!(s.status, SessionStatus::ProjectSelected);
        assert!(s.store.is_empty());
        assert!(s.last_instruction.is_none());
        assert!(!s.overview_sent);
    }

    #[test]
    fn snapshot_roundtrip_preserves_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = state();
        s.store.append(Turn::now(TurnSender::User, "build X"));
        s.store.append(Turn::now(TurnSender::Advisory, "create file.py"));
        s.last_instruction = Some("create file.py".to_string());
        s.overview_sent = true;
        s.status = SessionStatus::PausedAwaitingUserInput {
            question: "which db?".to_string(),
        };
        s.save(tmp.path()).unwrap();

        let loaded = SessionState::load(tmp.path(), s.project_id, s.limits).unwrap();
        assert_eq!(loaded.status, s.status);
        assert_eq!(loaded.store.len(), 2);
        assert_eq!(loaded.last_instruction.as_deref(), Some("create file.py"));
        assert!(loaded.overview_sent);
        assert_eq!(loaded.limits, s.limits);
    }

    #[test]
    fn missing_snapshot_loads_fresh() {
        let tmp = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let loaded = SessionState::load(tmp.path(), id, HistoryLimits::default()).unwrap();
        assert_eq!(loaded.project_id, id);
        assert_eq!(loaded.status, SessionStatus::ProjectSelected);
    }

    #[test]
    fn mid_flight_status_degrades_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = state();
        s.status = SessionStatus::AwaitingResult;
        s.save(tmp.path()).unwrap();

        let loaded = SessionState::load(tmp.path(), s.project_id, s.limits).unwrap();
        assert_eq!(loaded.status, SessionStatus::ProjectSelected);
    }

    #[test]
    fn error_status_survives_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let mut s = state();
        s.status = SessionStatus::Error {
            kind: ErrorKind::Timeout,
            message: "no result within 300s".to_string(),
        };
        s.save(tmp.path()).unwrap();

        let loaded = SessionState::load(tmp.path(), s.project_id, s.limits).unwrap();
        assert!(matches!(
            loaded.status,
            SessionStatus::Error {
                kind: ErrorKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn snapshot_limits_win_over_current_config() {
        let tmp = tempfile::tempdir().unwrap();
        let custom = HistoryLimits {
            max_history_turns: 5,
            max_context_tokens: 1000,
            summarization_interval: 2,
        };
        let s = SessionState::new(Uuid::new_v4(), custom);
        s.save(tmp.path()).unwrap();

        let loaded =
            SessionState::load(tmp.path(), s.project_id, HistoryLimits::default()).unwrap();
        assert_eq!(loaded.limits, custom);
    }

    #[test]
    fn start_task_validity_by_status() {
        assert!(SessionStatus::ProjectSelected.can_start_task());
        assert!(SessionStatus::TaskComplete.can_start_task());
        assert!(SessionStatus::Idle.can_start_task());
        assert!(
            SessionStatus::Error {
                kind: ErrorKind::Io,
                message: String::new()
            }
            .can_start_task()
        );
        assert!(!SessionStatus::AwaitingResult.can_start_task());
        assert!(
            !SessionStatus::PausedAwaitingUserInput {
                question: "q".to_string()
            }
            .can_start_task()
        );
    }
}
