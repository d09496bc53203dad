//! The session state machine.
//!
//! One engine owns one live session. Three event sources — user commands,
//! the result-file watcher, and the advisory/summarization worker threads —
//! all funnel into a single mpsc queue that the engine loop alone consumes,
//! so no callback ever mutates session state directly. Slow advisory calls
//! run on worker threads tagged with a call id; watches are tagged with a
//! generation; stale completions from superseded calls or watches are
//! dropped on arrival.
//!
//! Every transition is finalized in memory, then the snapshot is persisted,
//! before the next event is accepted. Failures of the channel, the watch, or
//! the advisory backend become error states with a human-readable message;
//! none propagate out of the loop, and none are retried automatically.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::advisory::{AdvisoryClient, AdvisoryError};
use crate::channel::{ResultChannel, WatchHandle, WatchOutcome, WatchTiming};
use crate::classify::{self, Directive};
use crate::config::AppConfig;
use crate::log::{LogEvent, SessionLog};
use crate::paths;
use crate::project::Project;
use crate::prompt::{self, PromptInput};
use crate::session::{ErrorKind, SessionState, SessionStatus};
use crate::store::{Turn, TurnSender};

/// Events consumed by the engine loop.
pub enum EngineEvent {
    /// The result watcher delivered an outcome.
    Result(WatchOutcome),
    /// An advisory generate call finished on its worker thread.
    AdvisoryDone {
        call_id: u64,
        outcome: Result<String, AdvisoryError>,
    },
    /// A summarization call finished on its worker thread.
    SummarizeDone {
        call_id: u64,
        /// Number of turns the planned compaction covers.
        cut: usize,
        outcome: Result<String, AdvisoryError>,
    },
    /// User-initiated stop (command or Ctrl-C).
    Stop,
}

/// The orchestrator: owns session state, drives the
/// write-instruction / await-result / interpret-response cycle.
pub struct Engine {
    project: Project,
    state: SessionState,
    config: AppConfig,
    advisory: Arc<dyn AdvisoryClient>,
    channel: ResultChannel,
    log: SessionLog,
    tx: Sender<EngineEvent>,
    rx: Receiver<EngineEvent>,
    watch: Option<WatchHandle>,
    watch_generation: u64,
    call_counter: u64,
    /// Call id of the advisory/summarize call whose completion we will
    /// accept; completions with any other id are stale and dropped.
    pending_call: Option<u64>,
    /// Executor output held across a summarization pass so the follow-up
    /// advisory call still sees it.
    pending_executor_output: Option<String>,
}

impl Engine {
    /// Select a project: load (or initialize) its session and persist the
    /// snapshot so the selection survives a crash.
    pub fn new(
        project: Project,
        config: AppConfig,
        advisory: Arc<dyn AdvisoryClient>,
    ) -> Result<Self> {
        let state = SessionState::load(
            &project.workspace_root,
            project.id,
            config.session.history_limits(),
        )?;
        let channel = ResultChannel::new(&project.workspace_root, &config.paths);
        let log = SessionLog::open(&paths::session_log_path(&project.workspace_root))?;
        let (tx, rx) = mpsc::channel();

        let engine = Self {
            project,
            state,
            config,
            advisory,
            channel,
            log,
            tx,
            rx,
            watch: None,
            watch_generation: 0,
            call_counter: 0,
            pending_call: None,
            pending_executor_output: None,
        };
        engine.persist()?;
        info!(project = %engine.project.name, status = %engine.state.status, "session loaded");
        Ok(engine)
    }

    /// Sender for pushing events from outside the loop (Ctrl-C handler).
    pub fn event_sender(&self) -> Sender<EngineEvent> {
        self.tx.clone()
    }

    pub fn status(&self) -> &SessionStatus {
        &self.state.status
    }

    pub fn session(&self) -> &SessionState {
        &self.state
    }

    /// Begin (or restart) the task loop with a goal.
    ///
    /// Valid from the selected, complete, idle, and error states; a usage
    /// error anywhere else, with no state change.
    pub fn start_task(&mut self, goal: &str) -> Result<()> {
        if !self.state.status.can_start_task() {
            bail!(
                "cannot start a task while the session is {}",
                self.state.status
            );
        }
        if goal.trim().is_empty() {
            bail!("goal must not be empty");
        }

        self.log_event(LogEvent::TaskStarted {
            goal: goal.to_string(),
        });
        self.append_turn(TurnSender::User, goal.trim());
        self.transition(SessionStatus::CallingAdvisory);
        self.dispatch_advisory(None);
        self.persist()
    }

    /// Answer a pending advisory question. Valid only while paused; a usage
    /// error anywhere else, with no state change.
    pub fn resume_with_user_input(&mut self, text: &str) -> Result<()> {
        let SessionStatus::PausedAwaitingUserInput { .. } = &self.state.status else {
            bail!(
                "no question is pending (session is {})",
                self.state.status
            );
        };

        self.log_event(LogEvent::UserInput { chars: text.len() });
        self.append_turn(TurnSender::User, text);
        self.transition(SessionStatus::CallingAdvisory);
        self.dispatch_advisory(None);
        self.persist()
    }

    /// Cancel any pending watch and in-flight call, go idle, persist.
    /// Idempotent; terminal states other than idle are left as they are.
    pub fn stop(&mut self) -> Result<()> {
        self.apply_stop();
        self.persist()
    }

    /// Drive the loop until the session settles (paused, complete, idle, or
    /// error). Returns the settled status.
    pub fn run_until_settled(&mut self) -> Result<SessionStatus> {
        while self.state.status.is_active() {
            self.step()?;
        }
        Ok(self.state.status.clone())
    }

    /// Process exactly one event. Returns true once the session is settled.
    ///
    /// Blocks until an event arrives; in every active state at least one
    /// worker (watcher or advisory thread) owes the queue an event.
    pub fn step(&mut self) -> Result<bool> {
        let event = self
            .rx
            .recv()
            .context("engine event channel disconnected")?;
        self.handle_event(event);
        self.persist()?;
        Ok(!self.state.status.is_active())
    }

    // ── event handling ──

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Stop => self.apply_stop(),
            EngineEvent::AdvisoryDone { call_id, outcome } => {
                if self.pending_call != Some(call_id) {
                    debug!(call_id, "dropping stale advisory completion");
                    return;
                }
                self.pending_call = None;
                if self.state.status != SessionStatus::CallingAdvisory {
                    warn!(status = %self.state.status, "advisory completed outside a call; ignoring");
                    return;
                }
                match outcome {
                    Ok(text) => self.apply_advisory_response(&text),
                    Err(e) => self.fail(
                        ErrorKind::AdvisoryApi,
                        format!("advisory call failed: {e}"),
                    ),
                }
            }
            EngineEvent::SummarizeDone {
                call_id,
                cut,
                outcome,
            } => {
                if self.pending_call != Some(call_id) {
                    debug!(call_id, "dropping stale summarization completion");
                    return;
                }
                self.pending_call = None;
                if self.state.status != SessionStatus::Summarizing {
                    warn!(status = %self.state.status, "summarization completed outside a pass; ignoring");
                    return;
                }
                match outcome {
                    Ok(summary) => {
                        self.state.store.apply_compaction(cut, summary);
                        // The compacted prefix may have carried the workspace
                        // overview; resend it on the next call.
                        self.state.overview_sent = false;
                        self.log_event(LogEvent::SummarizationRun {
                            compacted_turns: cut,
                            ok: true,
                        });
                        info!(compacted_turns = cut, "history compacted");
                    }
                    Err(e) => {
                        warn!(error = %e, "summarization failed; continuing with full history");
                        self.log_event(LogEvent::SummarizationRun {
                            compacted_turns: 0,
                            ok: false,
                        });
                    }
                }
                let executor_output = self.pending_executor_output.take();
                self.transition(SessionStatus::CallingAdvisory);
                self.dispatch_advisory(executor_output);
            }
            EngineEvent::Result(outcome) => {
                if outcome.generation() != self.watch_generation {
                    debug!(
                        generation = outcome.generation(),
                        "dropping outcome from superseded watch"
                    );
                    return;
                }
                if self.state.status != SessionStatus::AwaitingResult {
                    warn!(status = %self.state.status, "watch outcome outside awaiting state; ignoring");
                    return;
                }
                // The watcher emits once and exits; reap the thread.
                if let Some(mut watch) = self.watch.take() {
                    watch.cancel();
                }
                match outcome {
                    WatchOutcome::Ready { content, .. } => self.apply_result(&content),
                    WatchOutcome::TimedOut { .. } => {
                        let waited = self.config.session.result_timeout_secs;
                        self.log_event(LogEvent::ResultTimedOut { waited_secs: waited });
                        self.fail(
                            ErrorKind::Timeout,
                            format!("no executor result within {waited}s"),
                        );
                    }
                    WatchOutcome::Failed { error, .. } => self.fail(ErrorKind::Io, error),
                }
            }
        }
    }

    fn apply_advisory_response(&mut self, text: &str) {
        let directive = match classify::classify_advisory(text) {
            Ok(d) => d,
            Err(_) => {
                self.fail(
                    ErrorKind::MalformedResult,
                    "advisory returned an empty response".to_string(),
                );
                return;
            }
        };

        match directive {
            Directive::Instruction(instruction) => {
                self.log_event(LogEvent::AdvisoryResponded {
                    directive: "instruction".to_string(),
                });
                self.append_turn(TurnSender::Advisory, &instruction);
                if let Err(e) = self.channel.send_instruction(&instruction) {
                    self.fail(
                        ErrorKind::Io,
                        format!("failed to write instruction: {e:#}"),
                    );
                    return;
                }
                self.state.last_instruction = Some(instruction.clone());
                self.log_event(LogEvent::InstructionWritten {
                    chars: instruction.len(),
                });
                self.transition(SessionStatus::AwaitingResult);
                if let Err(e) = self.start_watch() {
                    self.fail(
                        ErrorKind::Io,
                        format!("failed to start result watch: {e:#}"),
                    );
                }
            }
            Directive::NeedUserInput(question) => {
                self.log_event(LogEvent::AdvisoryResponded {
                    directive: "need_user_input".to_string(),
                });
                self.append_turn(TurnSender::Advisory, text.trim());
                self.transition(SessionStatus::PausedAwaitingUserInput { question });
            }
            Directive::TaskComplete => {
                self.log_event(LogEvent::AdvisoryResponded {
                    directive: "task_complete".to_string(),
                });
                self.append_turn(TurnSender::Advisory, text.trim());
                self.transition(SessionStatus::TaskComplete);
            }
            Directive::SystemError(message) => {
                self.log_event(LogEvent::AdvisoryResponded {
                    directive: "system_error".to_string(),
                });
                self.fail(
                    ErrorKind::AdvisoryApi,
                    format!("advisory reported: {message}"),
                );
            }
        }
    }

    fn apply_result(&mut self, content: &str) {
        self.transition(SessionStatus::ProcessingResult);

        let report = match classify::parse_result(content) {
            Ok(r) => r,
            Err(_) => {
                self.fail(
                    ErrorKind::MalformedResult,
                    "executor result file was empty".to_string(),
                );
                return;
            }
        };

        self.log_event(LogEvent::ResultReceived {
            report: report.kind.as_str().to_string(),
            chars: content.len(),
        });
        let content = content.trim().to_string();
        self.append_turn(TurnSender::Executor, &content);

        if let Err(e) = self.channel.archive_result() {
            warn!(error = %format!("{e:#}"), "failed to archive result file");
        }

        let limits = self.state.limits;
        if self.state.store.needs_summarization(&limits)
            && self.state.store.plan_compaction(&limits).is_some()
        {
            self.pending_executor_output = Some(content);
            self.transition(SessionStatus::Summarizing);
            self.begin_summarization();
        } else {
            self.transition(SessionStatus::CallingAdvisory);
            self.dispatch_advisory(Some(content));
        }
    }

    fn apply_stop(&mut self) {
        if let Some(mut watch) = self.watch.take() {
            watch.cancel();
        }
        self.pending_call = None;
        self.pending_executor_output = None;
        match self.state.status {
            SessionStatus::Idle
            | SessionStatus::TaskComplete
            | SessionStatus::Error { .. } => {}
            _ => {
                self.log_event(LogEvent::SessionStopped);
                self.transition(SessionStatus::Idle);
            }
        }
    }

    // ── workers ──

    /// Assemble the prompt from current state and hand the generate call to
    /// a worker thread; the loop stays free to accept events meanwhile.
    fn dispatch_advisory(&mut self, executor_output: Option<String>) {
        self.call_counter += 1;
        let call_id = self.call_counter;
        self.pending_call = Some(call_id);

        let overview = if self.state.overview_sent {
            None
        } else {
            self.state.overview_sent = true;
            Some(prompt::workspace_overview(&self.project.workspace_root))
        };
        let window = self
            .state
            .store
            .recent_window(self.state.limits.max_history_turns);
        let assembled = prompt::assemble(&PromptInput {
            goal: &self.project.overall_goal,
            context_summary: &self.state.store.context_summary,
            history: window,
            executor_output: executor_output.as_deref(),
            overview: overview.as_deref(),
        });
        self.log_event(LogEvent::AdvisoryCalled {
            prompt_chars: assembled.len(),
        });

        let advisory = Arc::clone(&self.advisory);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let outcome = advisory.generate(&assembled);
            let _ = tx.send(EngineEvent::AdvisoryDone { call_id, outcome });
        });
    }

    /// Plan a compaction and hand the summarize call to a worker thread.
    fn begin_summarization(&mut self) {
        let Some(plan) = self.state.store.plan_compaction(&self.state.limits) else {
            // Plan was checked by the caller; an empty plan here means the
            // history shrank meanwhile, which a single-owner loop rules out.
            self.transition(SessionStatus::CallingAdvisory);
            let pending = self.pending_executor_output.take();
            self.dispatch_advisory(pending);
            return;
        };
        self.call_counter += 1;
        let call_id = self.call_counter;
        self.pending_call = Some(call_id);

        let advisory = Arc::clone(&self.advisory);
        let tx = self.tx.clone();
        let cut = plan.cut;
        std::thread::spawn(move || {
            let outcome = advisory.summarize(&plan.input);
            let _ = tx.send(EngineEvent::SummarizeDone {
                call_id,
                cut,
                outcome,
            });
        });
    }

    fn start_watch(&mut self) -> Result<()> {
        self.watch_generation += 1;
        let timing = WatchTiming {
            timeout: Duration::from_secs(self.config.session.result_timeout_secs),
            poll_interval: Duration::from_millis(self.config.session.poll_interval_millis),
            debounce: Duration::from_millis(self.config.session.debounce_millis),
        };
        let tx = self.tx.clone();
        let handle = self
            .channel
            .watch(self.watch_generation, timing, move |outcome| {
                let _ = tx.send(EngineEvent::Result(outcome));
            })?;
        self.watch = Some(handle);
        Ok(())
    }

    // ── shared plumbing ──

    fn transition(&mut self, to: SessionStatus) {
        if self.state.status == to {
            return;
        }
        self.log_event(LogEvent::StateChanged {
            from: self.state.status.to_string(),
            to: to.to_string(),
        });
        info!(from = %self.state.status, to = %to, "state change");
        self.state.status = to;
    }

    fn fail(&mut self, kind: ErrorKind, message: String) {
        warn!(kind = %kind, message = %message, "session error");
        self.transition(SessionStatus::Error { kind, message });
    }

    fn append_turn(&mut self, sender: TurnSender, message: &str) {
        self.state.store.append(Turn::now(sender, message));
    }

    fn persist(&self) -> Result<()> {
        self.state.save(&self.project.workspace_root)
    }

    fn log_event(&self, event: LogEvent) {
        if let Err(e) = self.log.log(event) {
            warn!(error = %format!("{e:#}"), "failed to write session log");
        }
    }
}
