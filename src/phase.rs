use crate::protocol::Segment;
use regex::Regex;
use std::sync::LazyLock;

/// Where the agent is in its run, as far as the client can tell from stage
/// labels. Ordering follows the order phases are entered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    #[default]
    Pre,
    Tools,
    Answer,
}

static ANSWER_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*answer|producing final answer|reasoning based on")
        .expect("answer label pattern is valid")
});

// Either a call shape (`get(`) or a snake_case tool name before a colon
// (`get_section:`).
static TOOLS_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*tools|sending query|tool|routing|running|search|\b[a-z_][a-z0-9_]*\(|\b[a-z][a-z0-9]*_[a-z0-9_]+\s*:",
    )
    .expect("tools label pattern is valid")
});

/// Advance the phase for a stage label. `Answer` is terminal.
pub fn classify(label: &str, current: Phase) -> Phase {
    if current == Phase::Answer {
        return Phase::Answer;
    }
    if ANSWER_LABEL.is_match(label) {
        return Phase::Answer;
    }
    if TOOLS_LABEL.is_match(label) {
        return Phase::Tools;
    }
    current
}

/// Pick the buffer for a token. A segment declared upstream always wins;
/// untagged tokens follow the phase.
pub fn route(segment: Option<Segment>, phase: Phase) -> Segment {
    match (segment, phase) {
        (Some(segment), _) => segment,
        (None, Phase::Answer) => Segment::Answer,
        (None, Phase::Pre | Phase::Tools) => Segment::Materials,
    }
}
