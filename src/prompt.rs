//! Prompt assembly for the advisory backend.
//!
//! Every call gets the full frame: the standing-orders preamble describing
//! the marker protocol, the project goal, an optional workspace overview, the
//! rolling summary of older conversation, the recent history window, and the
//! latest executor output when one triggered the call.

use std::path::Path;

use crate::classify::{MARKER_NEED_USER_INPUT, MARKER_SYSTEM_ERROR, MARKER_TASK_COMPLETE};
use crate::store::{Turn, TurnSender};

/// Standing orders sent at the top of every advisory prompt.
const SOP_PREAMBLE: &str = "\
You are the planning side of a coordination loop. An independent executor \
tool carries out one instruction at a time and reports back through a file \
channel; you never run anything yourself.

Break the user's overall goal into single, explicit, self-contained \
instructions. The executor keeps no memory between instructions, so each one \
must stand alone: complete code blocks, full paths, all parameters.

Respond in exactly one of these forms:
- An instruction for the executor: output the instruction text directly. \
This is the most common response.
- A question for the user: start the response with `NEED_USER_INPUT:` \
followed by one concise question.
- Goal achieved: output `TASK_COMPLETE` on a line of its own.
- Your own unrecoverable failure: start the response with `SYSTEM_ERROR:` \
followed by a short description.

Output only the instruction or one marker line. Analyze the executor's \
previous output carefully before deciding the next step; if it reported an \
error, decide whether to retry, adjust, or ask the user.";

/// Everything the prompt builder needs for one call.
pub struct PromptInput<'a> {
    pub goal: &'a str,
    pub context_summary: &'a str,
    /// Recent turns, oldest first.
    pub history: &'a [Turn],
    /// Output from the executor step that triggered this call, if any.
    pub executor_output: Option<&'a str>,
    /// Workspace overview, included on the first call and again after
    /// summarization may have compacted it away.
    pub overview: Option<&'a str>,
}

pub fn assemble(input: &PromptInput<'_>) -> String {
    let mut parts = vec![
        SOP_PREAMBLE.to_string(),
        format!("User's overall project goal: {}", input.goal),
    ];

    if let Some(overview) = input.overview {
        parts.push(format!("--- Project structure overview ---\n{overview}"));
    }

    if !input.context_summary.is_empty() {
        parts.push(format!(
            "--- Summary of earlier conversation ---\n{}",
            input.context_summary
        ));
    }

    let mut history = String::from("--- Recent conversation (oldest to newest) ---");
    for turn in input.history {
        history.push('\n');
        history.push_str(&render_turn(turn));
    }
    parts.push(history);

    if let Some(output) = input.executor_output {
        let body = if output.trim().is_empty() {
            "[no output from executor]"
        } else {
            output
        };
        parts.push(format!("--- Output from last executor step ---\n{body}"));
    }

    parts.push(
        "--- Your next step ---\nProvide the next instruction OR one of the \
         markers (NEED_USER_INPUT:, TASK_COMPLETE, SYSTEM_ERROR:)."
            .to_string(),
    );

    parts.join("\n\n")
}

/// Render one history turn with a role label. Past marker responses get
/// relabeled so the backend doesn't mistake its own old markers for fresh
/// protocol lines.
fn render_turn(turn: &Turn) -> String {
    if turn.sender == TurnSender::Advisory {
        if let Some(rest) = turn.message.strip_prefix(MARKER_NEED_USER_INPUT) {
            return format!("Your previous question to the user: {}", rest.trim());
        }
        if let Some(rest) = turn.message.strip_prefix(MARKER_TASK_COMPLETE) {
            return format!("Your previous completion statement: {}", rest.trim());
        }
        if let Some(rest) = turn.message.strip_prefix(MARKER_SYSTEM_ERROR) {
            return format!("Your previous reported error: {}", rest.trim());
        }
    }
    format!("{}: {}", turn.sender.label(), turn.message)
}

/// Entries listed per directory level in the overview.
const OVERVIEW_MAX_ENTRIES: usize = 50;

/// Shallow two-level listing of the workspace, for the advisory backend's
/// first look at the project. Hidden directories and build output are
/// skipped.
pub fn workspace_overview(root: &Path) -> String {
    let mut lines = Vec::new();
    list_level(root, 0, &mut lines);
    if lines.is_empty() {
        "(empty workspace)".to_string()
    } else {
        lines.join("\n")
    }
}

fn list_level(dir: &Path, depth: usize, lines: &mut Vec<String>) {
    if depth > 1 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut entries: Vec<_> = entries.flatten().collect();
    entries.sort_by_key(|e| e.file_name());

    let mut listed = 0;
    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') || name == "target" || name == "__pycache__" {
            continue;
        }
        if listed >= OVERVIEW_MAX_ENTRIES {
            lines.push(format!("{}...", "  ".repeat(depth)));
            break;
        }
        let path = entry.path();
        let is_dir = path.is_dir();
        lines.push(format!(
            "{}{}{}",
            "  ".repeat(depth),
            name,
            if is_dir { "/" } else { "" }
        ));
        listed += 1;
        if is_dir {
            list_level(&path, depth + 1, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Turn, TurnSender};

    fn turn(sender: TurnSender, msg: &str) -> Turn {
        Turn::now(sender, msg)
    }

    #[test]
    fn prompt_contains_goal_and_history_labels() {
        let history = [
            turn(TurnSender::User, "build X"),
            turn(TurnSender::Advisory, "create file.py"),
            turn(TurnSender::Executor, "SUCCESS: created"),
        ];
        let prompt = assemble(&PromptInput {
            goal: "build X",
            context_summary: "",
            history: &history,
            executor_output: None,
            overview: None,
        });

        assert!(prompt.contains("overall project goal: build X"));
        assert!(prompt.contains("User: build X"));
        assert!(prompt.contains("Executor output: SUCCESS: created"));
        assert!(!prompt.contains("Summary of earlier conversation"));
    }

    #[test]
    fn summary_and_overview_sections_appear_when_present() {
        let prompt = assemble(&PromptInput {
            goal: "g",
            context_summary: "did A and B",
            history: &[],
            executor_output: None,
            overview: Some("src/\nREADME.md"),
        });
        assert!(prompt.contains("Summary of earlier conversation"));
        assert!(prompt.contains("did A and B"));
        assert!(prompt.contains("Project structure overview"));
        assert!(prompt.contains("README.md"));
    }

    #[test]
    fn executor_output_section_handles_empty_output() {
        let prompt = assemble(&PromptInput {
            goal: "g",
            context_summary: "",
            history: &[],
            executor_output: Some("   "),
            overview: None,
        });
        assert!(prompt.contains("[no output from executor]"));
    }

    #[test]
    fn past_marker_responses_are_relabeled() {
        let history = [turn(TurnSender::Advisory, "NEED_USER_INPUT: which db?")];
        let prompt = assemble(&PromptInput {
            goal: "g",
            context_summary: "",
            history: &history,
            executor_output: None,
            overview: None,
        });
        assert!(prompt.contains("Your previous question to the user: which db?"));
        // The history must not re-emit the marker at line start.
        assert!(!prompt.contains("\nNEED_USER_INPUT:"));
    }

    #[test]
    fn overview_lists_two_levels_and_skips_hidden() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src").join("deep")).unwrap();
        std::fs::write(tmp.path().join("src").join("main.rs"), "").unwrap();
        std::fs::write(tmp.path().join("README.md"), "").unwrap();
        std::fs::create_dir_all(tmp.path().join(".git")).unwrap();
        std::fs::write(tmp.path().join("src").join("deep").join("too_deep.rs"), "").unwrap();

        let overview = workspace_overview(tmp.path());
        assert!(overview.contains("README.md"));
        assert!(overview.contains("src/"));
        assert!(overview.contains("  main.rs"));
        assert!(overview.contains("  deep/"));
        assert!(!overview.contains("too_deep.rs"));
        assert!(!overview.contains(".git"));
    }

    #[test]
    fn overview_of_empty_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(workspace_overview(tmp.path()), "(empty workspace)");
    }
}
