//! Marker classification for both sides of the conversation.
//!
//! Advisory responses and executor result files are free text with an agreed
//! set of leading markers. Both parsers are explicit ordered-rule classifiers
//! returning a closed set of variants — the markers are never re-checked with
//! ad-hoc string searches elsewhere in the engine.

use thiserror::Error;

/// Marker the advisory backend uses to ask the user a question.
pub const MARKER_NEED_USER_INPUT: &str = "NEED_USER_INPUT:";
/// Marker the advisory backend uses to declare the goal achieved.
pub const MARKER_TASK_COMPLETE: &str = "TASK_COMPLETE";
/// Marker the advisory backend uses to report its own failure.
pub const MARKER_SYSTEM_ERROR: &str = "SYSTEM_ERROR:";

/// Structured reading of an advisory response.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// An instruction to forward to the executor, full trimmed text.
    Instruction(String),
    /// The advisory needs an answer from the user before it can continue.
    NeedUserInput(String),
    /// The overall goal is done.
    TaskComplete,
    /// The advisory reported an internal failure.
    SystemError(String),
}

/// The advisory returned no usable text at all.
#[derive(Debug, Error, PartialEq)]
#[error("advisory response was empty")]
pub struct EmptyResponse;

/// Classify a raw advisory response into a [`Directive`].
///
/// Rules are checked in precedence order against the whole response; within a
/// rule the first line carrying the marker wins. An empty response is an
/// error, never an instruction with an empty body.
///
/// 1. A line beginning `SYSTEM_ERROR:` — the remainder of that line plus any
///    following text is the message.
/// 2. A line beginning `NEED_USER_INPUT:` — the remainder of that line is the
///    question.
/// 3. A standalone `TASK_COMPLETE` line.
/// 4. Anything else is an instruction.
pub fn classify_advisory(raw: &str) -> Result<Directive, EmptyResponse> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EmptyResponse);
    }

    if let Some((line_rest, following)) = find_marker_line(trimmed, MARKER_SYSTEM_ERROR) {
        let mut message = line_rest.to_string();
        if !following.is_empty() {
            if !message.is_empty() {
                message.push('\n');
            }
            message.push_str(following);
        }
        return Ok(Directive::SystemError(message));
    }

    if let Some((line_rest, _)) = find_marker_line(trimmed, MARKER_NEED_USER_INPUT) {
        return Ok(Directive::NeedUserInput(line_rest.to_string()));
    }

    if trimmed.lines().any(|l| l.trim() == MARKER_TASK_COMPLETE) {
        return Ok(Directive::TaskComplete);
    }

    Ok(Directive::Instruction(trimmed.to_string()))
}

/// Find the first line beginning with `marker`. Returns the trimmed remainder
/// of that line and the untouched text after it.
fn find_marker_line<'a>(text: &'a str, marker: &str) -> Option<(&'a str, &'a str)> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let content = line.trim_end_matches(['\n', '\r']);
        if let Some(rest) = content.trim_start().strip_prefix(marker) {
            let following = &text[offset + line.len()..];
            return Some((rest.trim(), following.trim()));
        }
        offset += line.len();
    }
    None
}

/// How a result file's content folds into an executor turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Success,
    Error,
    ClarificationNeeded,
    PartialSuccess,
    AwaitingInstruction,
    /// No recognized marker; the content is forwarded as-is.
    Raw,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ReportKind::Success => "success",
            ReportKind::Error => "error",
            ReportKind::ClarificationNeeded => "clarification_needed",
            ReportKind::PartialSuccess => "partial_success",
            ReportKind::AwaitingInstruction => "awaiting_instruction",
            ReportKind::Raw => "raw",
        }
    }
}

/// A parsed executor result.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorReport {
    pub kind: ReportKind,
    /// Remainder of the marker line, or the full text for `Raw`.
    pub detail: String,
}

/// The result file was empty or whitespace-only.
#[derive(Debug, Error, PartialEq)]
#[error("result file was empty")]
pub struct EmptyResult;

/// Parse a result file's content. The first line carrying a recognized
/// leading marker decides the kind; content with no marker is `Raw`.
pub fn parse_result(raw: &str) -> Result<ExecutorReport, EmptyResult> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EmptyResult);
    }

    for line in trimmed.lines() {
        let line = line.trim_start();
        for (marker, kind) in [
            ("SUCCESS:", ReportKind::Success),
            ("ERROR:", ReportKind::Error),
            ("CLARIFICATION_NEEDED:", ReportKind::ClarificationNeeded),
            ("PARTIAL_SUCCESS:", ReportKind::PartialSuccess),
        ] {
            if let Some(rest) = line.strip_prefix(marker) {
                return Ok(ExecutorReport {
                    kind,
                    detail: rest.trim().to_string(),
                });
            }
        }
        if line.trim_end() == "AWAITING_INSTRUCTION" {
            return Ok(ExecutorReport {
                kind: ReportKind::AwaitingInstruction,
                detail: String::new(),
            });
        }
    }

    Ok(ExecutorReport {
        kind: ReportKind::Raw,
        detail: trimmed.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn plain_text_is_an_instruction() {
        assert_eq!(
            classify_advisory("create file.py").unwrap(),
            Directive::Instruction("create file.py".to_string())
        );
    }

    #[test]
    fn instruction_body_is_trimmed() {
        assert_eq!(
            classify_advisory("  run the tests \n").unwrap(),
            Directive::Instruction("run the tests".to_string())
        );
    }

    #[test]
    fn empty_response_is_an_error_not_an_empty_instruction() {
        assert_eq!(classify_advisory(""), Err(EmptyResponse));
        assert_eq!(classify_advisory("  \n \t"), Err(EmptyResponse));
    }

    #[test]
    fn need_user_input_extracts_question() {
        assert_eq!(
            classify_advisory("NEED_USER_INPUT: which framework?").unwrap(),
            Directive::NeedUserInput("which framework?".to_string())
        );
    }

    #[test]
    fn need_user_input_wins_over_later_task_complete() {
        let raw = "NEED_USER_INPUT: proceed with plan B?\nTASK_COMPLETE";
        assert_eq!(
            classify_advisory(raw).unwrap(),
            Directive::NeedUserInput("proceed with plan B?".to_string())
        );
    }

    #[test]
    fn system_error_wins_over_everything() {
        let raw = "NEED_USER_INPUT: ignored\nSYSTEM_ERROR: context corrupted\nmore detail";
        assert_eq!(
            classify_advisory(raw).unwrap(),
            Directive::SystemError("context corrupted\nmore detail".to_string())
        );
    }

    #[test]
    fn system_error_message_spans_following_text() {
        let raw = "SYSTEM_ERROR: bad state\nline two";
        assert_eq!(
            classify_advisory(raw).unwrap(),
            Directive::SystemError("bad state\nline two".to_string())
        );
    }

    #[test]
    fn task_complete_must_be_a_standalone_line() {
        assert_eq!(
            classify_advisory("TASK_COMPLETE").unwrap(),
            Directive::TaskComplete
        );
        assert_eq!(
            classify_advisory("all done\nTASK_COMPLETE\n").unwrap(),
            Directive::TaskComplete
        );
        // Trailing words keep it an instruction under the standalone-line rule.
        assert_eq!(
            classify_advisory("TASK_COMPLETE all done").unwrap(),
            Directive::Instruction("TASK_COMPLETE all done".to_string())
        );
    }

    #[test]
    fn markers_are_case_sensitive() {
        assert_eq!(
            classify_advisory("need_user_input: lowercase?").unwrap(),
            Directive::Instruction("need_user_input: lowercase?".to_string())
        );
    }

    #[test]
    fn marker_matches_on_any_line_not_just_the_first() {
        let raw = "Some preamble.\nNEED_USER_INPUT: which port?";
        assert_eq!(
            classify_advisory(raw).unwrap(),
            Directive::NeedUserInput("which port?".to_string())
        );
    }

    #[test]
    fn result_markers_map_to_kinds() {
        let cases = [
            ("SUCCESS: done", ReportKind::Success, "done"),
            ("ERROR: no such file", ReportKind::Error, "no such file"),
            (
                "CLARIFICATION_NEEDED: which dir?",
                ReportKind::ClarificationNeeded,
                "which dir?",
            ),
            (
                "PARTIAL_SUCCESS: 2 of 3 steps",
                ReportKind::PartialSuccess,
                "2 of 3 steps",
            ),
        ];
        for (raw, kind, detail) in cases {
            let report = parse_result(raw).unwrap();
            assert_eq!(report.kind, kind);
            assert_eq!(report.detail, detail);
        }
    }

    #[test]
    fn awaiting_instruction_is_a_bare_token() {
        let report = parse_result("AWAITING_INSTRUCTION").unwrap();
        assert_eq!(report.kind, ReportKind::AwaitingInstruction);
    }

    #[test]
    fn unmarked_result_folds_as_raw() {
        let report = parse_result("compiled fine, 0 warnings").unwrap();
        assert_eq!(report.kind, ReportKind::Raw);
        assert_eq!(report.detail, "compiled fine, 0 warnings");
    }

    #[test]
    fn empty_result_is_an_error() {
        assert_eq!(parse_result("   \n"), Err(EmptyResult));
    }

    proptest! {
        // The classifier is total over non-empty text and never panics.
        #[test]
        fn classify_never_panics(raw in ".{0,200}") {
            match classify_advisory(&raw) {
                Ok(_) => {}
                Err(EmptyResponse) => prop_assert!(raw.trim().is_empty()),
            }
        }

        #[test]
        fn parse_result_never_panics(raw in ".{0,200}") {
            match parse_result(&raw) {
                Ok(_) => {}
                Err(EmptyResult) => prop_assert!(raw.trim().is_empty()),
            }
        }
    }
}
