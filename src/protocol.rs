use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub message: String,
}

/// Destination buffer a token may declare for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    Materials,
    Answer,
}

impl Segment {
    pub fn as_str(self) -> &'static str {
        match self {
            Segment::Materials => "materials",
            Segment::Answer => "answer",
        }
    }
}

/// One decoded line of the agent's NDJSON stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Stage {
        label: String,
    },
    Token {
        text: String,
        segment: Option<Segment>,
    },
    Info {
        message: String,
    },
    Error {
        message: String,
        stage: Option<String>,
    },
    ToolCall {
        tool_name: String,
        tool_input: Map<String, Value>,
    },
    ToolResult {
        result: Value,
    },
    /// Anything that did not match a known shape, kept verbatim.
    Unrecognized(Value),
}

// Wire shapes of the known variants. Decoding goes through this enum so a
// shape mismatch can fall back to `Event::Unrecognized` with the original
// value intact.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Stage {
        #[serde(default)]
        label: Option<String>,
    },
    Token {
        text: String,
        #[serde(default)]
        segment: Option<Segment>,
    },
    Info {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        stage: Option<String>,
    },
    ToolCall {
        tool_name: String,
        #[serde(default)]
        tool_input: Option<Map<String, Value>>,
    },
    ToolResult {
        #[serde(default, alias = "result")]
        text: Value,
    },
}

impl From<WireEvent> for Event {
    fn from(wire: WireEvent) -> Self {
        match wire {
            WireEvent::Stage { label } => Event::Stage {
                label: label.unwrap_or_default(),
            },
            WireEvent::Token { text, segment } => Event::Token { text, segment },
            WireEvent::Info { message } => Event::Info {
                message: message.unwrap_or_default(),
            },
            WireEvent::Error { message, stage } => Event::Error {
                message: message.unwrap_or_default(),
                stage,
            },
            WireEvent::ToolCall {
                tool_name,
                tool_input,
            } => Event::ToolCall {
                tool_name,
                tool_input: tool_input.unwrap_or_default(),
            },
            WireEvent::ToolResult { text } => Event::ToolResult { result: text },
        }
    }
}

impl Event {
    /// Classify an already-parsed JSON value. Never fails.
    pub fn from_value(value: Value) -> Self {
        match WireEvent::deserialize(&value) {
            Ok(wire) => wire.into(),
            Err(err) => {
                debug!(error = %err, "stream event did not match a known shape");
                Event::Unrecognized(value)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Stage { .. } => "stage",
            Event::Token { .. } => "token",
            Event::Info { .. } => "info",
            Event::Error { .. } => "error",
            Event::ToolCall { .. } => "tool_call",
            Event::ToolResult { .. } => "tool_result",
            Event::Unrecognized(_) => "unrecognized",
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Event::Stage { label } => json!({ "type": "stage", "label": label }),
            Event::Token {
                text,
                segment: Some(segment),
            } => json!({ "type": "token", "segment": segment.as_str(), "text": text }),
            Event::Token {
                text,
                segment: None,
            } => json!({ "type": "token", "text": text }),
            Event::Info { message } => json!({ "type": "info", "message": message }),
            Event::Error {
                message,
                stage: Some(stage),
            } => json!({ "type": "error", "stage": stage, "message": message }),
            Event::Error {
                message,
                stage: None,
            } => json!({ "type": "error", "message": message }),
            Event::ToolCall {
                tool_name,
                tool_input,
            } => json!({ "type": "tool_call", "tool_name": tool_name, "tool_input": tool_input }),
            Event::ToolResult { result } => json!({ "type": "tool_result", "text": result }),
            Event::Unrecognized(value) => value.clone(),
        }
    }

    /// One NDJSON line, newline included.
    pub fn to_line(&self) -> String {
        let mut line = self.to_value().to_string();
        line.push('\n');
        line
    }
}

/// Decode one complete line. Lines that are not JSON are dropped and only
/// show up in the debug log.
pub fn decode_line(line: &str) -> Option<Event> {
    match serde_json::from_str::<Value>(line) {
        Ok(value) => Some(Event::from_value(value)),
        Err(err) => {
            debug!(error = %err, line, "dropping malformed stream line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_stage() {
        let event = decode_line(r#"{"type":"stage","label":"Tools"}"#).unwrap();
        assert_eq!(
            event,
            Event::Stage {
                label: "Tools".into()
            }
        );
    }

    #[test]
    fn decodes_token_with_and_without_segment() {
        let tagged = decode_line(r#"{"type":"token","segment":"answer","text":"hi"}"#).unwrap();
        assert_eq!(
            tagged,
            Event::Token {
                text: "hi".into(),
                segment: Some(Segment::Answer)
            }
        );

        let plain = decode_line(r#"{"type":"token","text":"hi"}"#).unwrap();
        assert_eq!(
            plain,
            Event::Token {
                text: "hi".into(),
                segment: None
            }
        );
    }

    #[test]
    fn error_message_and_stage_are_optional() {
        let event = decode_line(r#"{"type":"error","stage":"llm_plan","message":"boom"}"#).unwrap();
        assert_eq!(
            event,
            Event::Error {
                message: "boom".into(),
                stage: Some("llm_plan".into())
            }
        );

        let bare = decode_line(r#"{"type":"error","message":null}"#).unwrap();
        assert_eq!(
            bare,
            Event::Error {
                message: String::new(),
                stage: None
            }
        );
    }

    #[test]
    fn tool_result_accepts_text_or_result_field() {
        let by_text = decode_line(r#"{"type":"tool_result","text":{"status":"success"}}"#).unwrap();
        let by_result =
            decode_line(r#"{"type":"tool_result","result":{"status":"success"}}"#).unwrap();
        assert_eq!(by_text, by_result);
        assert_eq!(
            by_text,
            Event::ToolResult {
                result: json!({ "status": "success" })
            }
        );
    }

    #[test]
    fn tool_call_input_defaults_to_empty_map() {
        let event = decode_line(r#"{"type":"tool_call","tool_name":"search"}"#).unwrap();
        assert_eq!(
            event,
            Event::ToolCall {
                tool_name: "search".into(),
                tool_input: Map::new()
            }
        );
    }

    #[test]
    fn unknown_type_is_preserved() {
        let line = r#"{"type":"heartbeat","seq":4}"#;
        let event = decode_line(line).unwrap();
        assert_eq!(
            event,
            Event::Unrecognized(serde_json::from_str(line).unwrap())
        );
    }

    #[test]
    fn missing_type_and_non_objects_are_preserved() {
        assert!(matches!(
            decode_line(r#"{"label":"Tools"}"#),
            Some(Event::Unrecognized(_))
        ));
        assert_eq!(decode_line("42"), Some(Event::Unrecognized(json!(42))));
    }

    #[test]
    fn known_type_with_wrong_shape_is_preserved() {
        let event = decode_line(r#"{"type":"token","text":7}"#).unwrap();
        assert_eq!(
            event,
            Event::Unrecognized(json!({ "type": "token", "text": 7 }))
        );
    }

    #[test]
    fn malformed_lines_are_dropped() {
        assert_eq!(decode_line("not json"), None);
        assert_eq!(decode_line(r#"{"type":"token","text":"#), None);
    }

    #[test]
    fn encoded_lines_decode_to_the_same_event() {
        let events = [
            Event::Stage {
                label: "Answer".into(),
            },
            Event::Token {
                text: "x\ny".into(),
                segment: Some(Segment::Materials),
            },
            Event::Error {
                message: "bad".into(),
                stage: Some("tool_execution".into()),
            },
        ];
        for event in events {
            let line = event.to_line();
            assert!(line.ends_with('\n'));
            assert_eq!(decode_line(line.trim()), Some(event));
        }
    }
}
