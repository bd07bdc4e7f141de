use crate::phase::{Phase, classify, route};
use crate::protocol::{Event, Segment};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

const UNKNOWN_ERROR: &str = "Unknown error";

static BLANK_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnId(Uuid);

impl TurnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// One question and everything streamed back for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Turn {
    pub id: TurnId,
    pub question: String,
    /// Retrieved material and tool summaries shown before the answer.
    pub materials: String,
    pub answer: String,
    /// Info notes and unrecognized events, one per line.
    pub meta: String,
    pub error: Option<String>,
    pub done: bool,
}

impl Turn {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Fold one event into the turn. Stage events only matter through the
    /// phase passed in for later tokens.
    pub fn apply(mut self, event: &Event, phase: Phase) -> Self {
        match event {
            Event::Stage { .. } | Event::ToolCall { .. } | Event::ToolResult { .. } => {}
            Event::Token { text, segment } => match route(*segment, phase) {
                Segment::Materials => self.materials.push_str(text),
                Segment::Answer => self.answer.push_str(text),
            },
            Event::Info { message } => self.push_meta(message),
            Event::Error { message, .. } => self = self.fail(message.clone()),
            Event::Unrecognized(value) => self.push_meta(&value.to_string()),
        }
        self
    }

    /// Record a terminal error. Only the first one sticks.
    pub fn fail(mut self, message: impl Into<String>) -> Self {
        if self.error.is_none() {
            let message = message.into();
            self.error = Some(if message.trim().is_empty() {
                UNKNOWN_ERROR.to_string()
            } else {
                message
            });
        }
        self.done = true;
        self
    }

    /// Close the turn after the user aborted the stream.
    pub fn cancel(mut self) -> Self {
        if !self.done {
            self.push_meta("Cancelled.");
        }
        self.finalize()
    }

    /// Tidy the buffers once the stream has ended.
    pub fn finalize(mut self) -> Self {
        let materials = BLANK_RUNS.replace_all(self.materials.trim(), "\n\n");
        self.materials = materials.into_owned();
        self.answer = self.answer.trim().to_string();
        self.done = true;
        self
    }

    fn push_meta(&mut self, note: &str) {
        let note = note.trim();
        if note.is_empty() {
            return;
        }
        if !self.meta.is_empty() {
            self.meta.push('\n');
        }
        self.meta.push_str(note);
    }
}

/// Tracks the phase of one turn while its events are applied in order.
#[derive(Debug, Default)]
pub struct Accumulator {
    phase: Phase,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn apply(&mut self, turn: Turn, event: &Event) -> Turn {
        if let Event::Stage { label } = event {
            self.phase = classify(label, self.phase);
        }
        turn.apply(event, self.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_line;
    use serde_json::json;

    fn stage(label: &str) -> Event {
        Event::Stage {
            label: label.into(),
        }
    }

    fn token(text: &str) -> Event {
        Event::Token {
            text: text.into(),
            segment: None,
        }
    }

    fn run(events: &[Event]) -> Turn {
        let mut acc = Accumulator::new();
        events
            .iter()
            .fold(Turn::new("q"), |turn, event| acc.apply(turn, event))
    }

    #[test]
    fn tokens_split_on_answer_stage() {
        let turn = run(&[stage("Tools: search"), token("a"), stage("Answer"), token("b")]).finalize();
        assert_eq!(turn.materials, "a");
        assert_eq!(turn.answer, "b");
        assert!(turn.done);
        assert_eq!(turn.error, None);
    }

    #[test]
    fn explicit_segment_overrides_phase() {
        let turn = run(&[
            stage("Answer"),
            Event::Token {
                text: "x".into(),
                segment: Some(Segment::Materials),
            },
        ])
        .finalize();
        assert_eq!(turn.materials, "x");
        assert_eq!(turn.answer, "");
    }

    #[test]
    fn tokens_before_any_stage_are_materials() {
        let turn = run(&[token("plan"), stage("Reasoning based on tool results"), token("done")]);
        assert_eq!(turn.materials, "plan");
        assert_eq!(turn.answer, "done");
    }

    #[test]
    fn stage_does_not_finish_turn() {
        let turn = run(&[stage("Answer")]);
        assert!(!turn.done);
    }

    #[test]
    fn error_keeps_partial_content() {
        let turn = run(&[
            token("partial"),
            Event::Error {
                message: "boom".into(),
                stage: None,
            },
        ]);
        assert!(turn.done);
        assert_eq!(turn.error.as_deref(), Some("boom"));
        assert_eq!(turn.materials, "partial");
    }

    #[test]
    fn first_error_wins() {
        let turn = run(&[
            Event::Error {
                message: "first".into(),
                stage: Some("tool_execution".into()),
            },
            token("late"),
            Event::Error {
                message: "second".into(),
                stage: None,
            },
        ]);
        assert_eq!(turn.error.as_deref(), Some("first"));
        assert_eq!(turn.materials, "late");
        assert!(turn.done);
    }

    #[test]
    fn empty_error_message_gets_fallback() {
        let turn = run(&[Event::Error {
            message: "  ".into(),
            stage: None,
        }]);
        assert_eq!(turn.error.as_deref(), Some(UNKNOWN_ERROR));
    }

    #[test]
    fn info_and_unknown_events_go_to_meta() {
        let turn = run(&[
            Event::Info {
                message: "Action list truncated to 6 steps for safety.".into(),
            },
            Event::Unrecognized(json!({ "type": "heartbeat" })),
            Event::Info {
                message: String::new(),
            },
        ]);
        assert_eq!(
            turn.meta,
            "Action list truncated to 6 steps for safety.\n{\"type\":\"heartbeat\"}"
        );
        assert_eq!(turn.materials, "");
        assert_eq!(turn.answer, "");
        assert!(!turn.done);
    }

    #[test]
    fn tool_events_leave_buffers_alone() {
        let turn = run(&[
            Event::ToolCall {
                tool_name: "search".into(),
                tool_input: serde_json::Map::new(),
            },
            Event::ToolResult {
                result: json!({ "status": "success" }),
            },
        ]);
        assert_eq!(turn, Turn { id: turn.id, ..Turn::new("q") });
    }

    #[test]
    fn finalize_trims_and_collapses_blank_runs() {
        let turn = run(&[
            token("\n\nRetrieved materials\n\n\n\n- 1.1: text\n\n\n"),
            stage("Answer"),
            token("  The answer.\n"),
        ])
        .finalize();
        assert_eq!(turn.materials, "Retrieved materials\n\n- 1.1: text");
        assert_eq!(turn.answer, "The answer.");
    }

    #[test]
    fn finalize_twice_is_stable() {
        let once = run(&[token("a\n\n\n\nb ")]).finalize();
        let twice = once.clone().finalize();
        assert_eq!(once, twice);
    }

    #[test]
    fn replay_is_deterministic() {
        let events = [
            stage("Routing"),
            token("plan\n"),
            stage("Tools"),
            token("- 3.4: keys"),
            stage("Answer"),
            token("Use "),
            token("AES."),
        ];
        let first = run(&events).finalize();
        let second = run(&events).finalize();
        assert_eq!(first.materials, second.materials);
        assert_eq!(first.answer, second.answer);
        assert_eq!(first.meta, second.meta);
    }

    #[test]
    fn malformed_line_among_valid_lines() {
        let lines = [
            r#"{"type":"stage","label":"Tools"}"#,
            r#"{"type":"token","text":"m"}"#,
            "{oops",
            r#"{"type":"stage","label":"Answer"}"#,
            r#"{"type":"token","text":"a"}"#,
        ];
        let events: Vec<Event> = lines.iter().filter_map(|l| decode_line(l)).collect();
        assert_eq!(events.len(), 4);
        let turn = run(&events).finalize();
        assert_eq!(turn.materials, "m");
        assert_eq!(turn.answer, "a");
    }

    #[test]
    fn cancel_marks_done_without_error() {
        let turn = run(&[token("half")]).cancel();
        assert!(turn.done);
        assert_eq!(turn.error, None);
        assert_eq!(turn.meta, "Cancelled.");
        assert_eq!(turn.materials, "half");
    }

    #[test]
    fn accumulator_reports_phase() {
        let mut acc = Accumulator::new();
        let turn = acc.apply(Turn::new("q"), &stage("Routing"));
        assert_eq!(acc.phase(), Phase::Tools);
        acc.apply(turn, &stage("Answer"));
        assert_eq!(acc.phase(), Phase::Answer);
    }
}
