//! Conversation history — ordered turns, rolling summary, compaction.
//!
//! The store is append-only except for summarization, which atomically
//! replaces a prefix of turns with a single system turn holding the new
//! summary. Compaction is split into a plan step (pure, produces the text to
//! summarize) and an apply step so the slow summarization call can run off
//! the engine thread between the two.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSender {
    User,
    Advisory,
    Executor,
    System,
}

impl TurnSender {
    /// Label used when rendering history into a prompt.
    pub fn label(self) -> &'static str {
        match self {
            TurnSender::User => "User",
            TurnSender::Advisory => "Your previous instruction/response",
            TurnSender::Executor => "Executor output",
            TurnSender::System => "System",
        }
    }
}

/// One message in the conversation history. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub sender: TurnSender,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn now(sender: TurnSender, message: impl Into<String>) -> Self {
        Self {
            sender,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Thresholds governing history growth and compaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryLimits {
    /// Newest turns kept verbatim through compaction, and the size of the
    /// history window rendered into prompts.
    pub max_history_turns: usize,
    /// Estimated-token ceiling for the full history before compaction kicks in.
    pub max_context_tokens: usize,
    /// Executor/advisory turns between compactions.
    pub summarization_interval: u32,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_history_turns: 20,
            max_context_tokens: 100_000,
            summarization_interval: 10,
        }
    }
}

/// A planned compaction: everything before `cut` gets replaced by one system
/// turn once the summary text comes back.
#[derive(Debug, Clone)]
pub struct CompactionPlan {
    /// Index of the first turn kept verbatim.
    pub cut: usize,
    /// Existing summary plus the turns being compacted, rendered for the
    /// summarizer.
    pub input: String,
}

/// Ordered history of exchanged turns plus the rolling summary and the
/// turns-since-summary counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationStore {
    turns: Vec<Turn>,
    #[serde(default)]
    pub context_summary: String,
    #[serde(default)]
    turns_since_summary: u32,
}

impl ConversationStore {
    /// Append a turn. Executor and advisory turns count toward the
    /// summarization interval; user and system turns do not.
    pub fn append(&mut self, turn: Turn) {
        if matches!(turn.sender, TurnSender::Executor | TurnSender::Advisory) {
            self.turns_since_summary += 1;
        }
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turns_since_summary(&self) -> u32 {
        self.turns_since_summary
    }

    /// The most recent `n` turns, oldest first.
    pub fn recent_window(&self, n: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }

    /// Rough token estimate for the full history (chars / 4, the same
    /// heuristic the advisory backend's own limits are checked against).
    pub fn estimated_tokens(&self) -> usize {
        let chars: usize = self
            .turns
            .iter()
            .map(|t| t.message.len())
            .sum::<usize>()
            + self.context_summary.len();
        chars / 4
    }

    /// Whether the history should be compacted before the next advisory call.
    pub fn needs_summarization(&self, limits: &HistoryLimits) -> bool {
        self.turns_since_summary >= limits.summarization_interval
            || self.estimated_tokens() > limits.max_context_tokens
    }

    /// Plan a compaction keeping the newest `max_history_turns` verbatim.
    ///
    /// Returns `None` when there is nothing older than the keep window, so a
    /// short history never shrinks below local continuity.
    pub fn plan_compaction(&self, limits: &HistoryLimits) -> Option<CompactionPlan> {
        let cut = self.turns.len().saturating_sub(limits.max_history_turns);
        if cut == 0 {
            return None;
        }

        let mut input = String::new();
        if !self.context_summary.is_empty() {
            input.push_str("Earlier summary:\n");
            input.push_str(&self.context_summary);
            input.push_str("\n\n");
        }
        input.push_str("Conversation to condense (oldest to newest):\n");
        for turn in &self.turns[..cut] {
            input.push_str(turn.sender.label());
            input.push_str(": ");
            input.push_str(&turn.message);
            input.push('\n');
        }
        Some(CompactionPlan { cut, input })
    }

    /// Apply a finished compaction: replace the planned prefix with one system
    /// turn carrying the new summary, update the rolling summary, and reset
    /// the interval counter. The replacement happens in one splice so no
    /// observer ever sees a half-compacted history.
    pub fn apply_compaction(&mut self, cut: usize, summary: String) {
        let cut = cut.min(self.turns.len());
        let summary_turn = Turn::now(
            TurnSender::System,
            format!("[conversation summary] {summary}"),
        );
        self.turns.splice(..cut, std::iter::once(summary_turn));
        self.context_summary = summary;
        self.turns_since_summary = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limits(interval: u32, max_turns: usize) -> HistoryLimits {
        HistoryLimits {
            max_history_turns: max_turns,
            max_context_tokens: 100_000,
            summarization_interval: interval,
        }
    }

    #[test]
    fn append_counts_only_executor_and_advisory_turns() {
        let mut store = ConversationStore::default();
        store.append(Turn::now(TurnSender::User, "start"));
        store.append(Turn::now(TurnSender::System, "note"));
        assert_eq!(store.turns_since_summary(), 0);

        store.append(Turn::now(TurnSender::Advisory, "do x"));
        store.append(Turn::now(TurnSender::Executor, "done"));
        assert_eq!(store.turns_since_summary(), 2);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn needs_summarization_at_interval() {
        let mut store = ConversationStore::default();
        let limits = limits(2, 50);
        store.append(Turn::now(TurnSender::Advisory, "a"));
        assert!(!store.needs_summarization(&limits));
        store.append(Turn::now(TurnSender::Executor, "b"));
        assert!(store.needs_summarization(&limits));
    }

    #[test]
    fn needs_summarization_on_token_pressure() {
        let mut store = ConversationStore::default();
        let limits = HistoryLimits {
            max_history_turns: 50,
            max_context_tokens: 10,
            summarization_interval: 100,
        };
        store.append(Turn::now(TurnSender::User, "x".repeat(200)));
        assert!(store.needs_summarization(&limits));
    }

    #[test]
    fn plan_is_none_when_history_fits_keep_window() {
        let mut store = ConversationStore::default();
        for i in 0..3 {
            store.append(Turn::now(TurnSender::Advisory, format!("turn {i}")));
        }
        assert!(store.plan_compaction(&limits(2, 5)).is_none());
    }

    #[test]
    fn compaction_keeps_verbatim_tail_and_resets_counter() {
        let mut store = ConversationStore::default();
        for i in 0..6 {
            store.append(Turn::now(TurnSender::Executor, format!("step {i}")));
        }
        let limits = limits(3, 2);
        let plan = store.plan_compaction(&limits).unwrap();
        assert_eq!(plan.cut, 4);
        assert!(plan.input.contains("step 0"));
        assert!(plan.input.contains("step 3"));
        assert!(!plan.input.contains("step 4"));

        store.apply_compaction(plan.cut, "condensed".to_string());

        assert_eq!(store.len(), 3);
        assert_eq!(store.turns()[0].sender, TurnSender::System);
        assert!(store.turns()[0].message.contains("condensed"));
        assert_eq!(store.turns()[1].message, "step 4");
        assert_eq!(store.turns()[2].message, "step 5");
        assert_eq!(store.turns_since_summary(), 0);
        assert_eq!(store.context_summary, "condensed");
    }

    #[test]
    fn compaction_input_carries_prior_summary() {
        let mut store = ConversationStore::default();
        store.context_summary = "old summary".to_string();
        for i in 0..4 {
            store.append(Turn::now(TurnSender::Advisory, format!("t{i}")));
        }
        let plan = store.plan_compaction(&limits(1, 1)).unwrap();
        assert!(plan.input.contains("old summary"));
    }

    #[test]
    fn recent_window_handles_short_history() {
        let mut store = ConversationStore::default();
        store.append(Turn::now(TurnSender::User, "only"));
        assert_eq!(store.recent_window(10).len(), 1);
    }

    #[test]
    fn snapshot_roundtrip() {
        let mut store = ConversationStore::default();
        store.append(Turn::now(TurnSender::User, "hello"));
        store.append(Turn::now(TurnSender::Advisory, "do x"));
        store.context_summary = "sum".to_string();

        let json = serde_json::to_string(&store).unwrap();
        let back: ConversationStore = serde_json::from_str(&json).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back.turns_since_summary(), 1);
        assert_eq!(back.context_summary, "sum");
        assert_eq!(back.turns()[0].message, "hello");
    }

    proptest! {
        // Outside compaction, appends only grow the history and compaction
        // never produces more turns than the keep window plus the summary.
        #[test]
        fn append_monotonic_and_compaction_bounded(
            messages in proptest::collection::vec(".{0,40}", 0..30),
            keep in 1usize..10,
        ) {
            let mut store = ConversationStore::default();
            let mut last_len = 0;
            for m in &messages {
                store.append(Turn::now(TurnSender::Executor, m.clone()));
                prop_assert!(store.len() > last_len);
                last_len = store.len();
            }

            let limits = HistoryLimits {
                max_history_turns: keep,
                max_context_tokens: 100_000,
                summarization_interval: 1,
            };
            if let Some(plan) = store.plan_compaction(&limits) {
                let before = store.len();
                store.apply_compaction(plan.cut, "s".to_string());
                prop_assert!(store.len() <= keep + 1);
                prop_assert!(store.len() <= before);
                prop_assert_eq!(store.turns_since_summary(), 0);
            }
        }
    }
}
