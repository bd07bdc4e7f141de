//! Plain-text views of a turn, used by the one-shot `ask` command.

use crate::grouped::{GroupItem, StageGroup};
use crate::protocol::Event;
use crate::turn::Turn;
use serde_json::Value;
use std::fmt::Write;

pub fn turn(turn: &Turn) -> String {
    let mut out = String::new();
    if !turn.materials.is_empty() {
        let _ = writeln!(out, "── Retrieved materials ──\n{}\n", turn.materials);
    }
    match &turn.error {
        Some(error) => {
            let _ = writeln!(out, "❌ {error}");
        }
        None if turn.answer.is_empty() => {
            let _ = writeln!(out, "{}", if turn.done { "…" } else { "Thinking…" });
        }
        None => {
            let _ = writeln!(out, "{}", turn.answer);
        }
    }
    for note in turn.meta.lines() {
        let _ = writeln!(out, "ⓘ {note}");
    }
    out
}

pub fn groups(groups: &[StageGroup]) -> String {
    let mut out = String::new();
    for group in groups {
        let label = group.label.as_deref().unwrap_or("(before first stage)");
        let _ = writeln!(out, "🟦 {label}");
        for item in &group.items {
            match item {
                GroupItem::Message(text) => {
                    for line in text.trim().lines() {
                        let _ = writeln!(out, "  {line}");
                    }
                }
                GroupItem::Event(event) => {
                    for line in event_lines(event) {
                        let _ = writeln!(out, "  {line}");
                    }
                }
            }
        }
        out.push('\n');
    }
    out
}

fn event_lines(event: &Event) -> Vec<String> {
    match event {
        Event::Info { message } => vec![format!("ℹ {message}")],
        Event::Error { message, stage } => match stage {
            Some(stage) => vec![format!("❌ [{stage}] {message}")],
            None => vec![format!("❌ {message}")],
        },
        Event::ToolCall {
            tool_name,
            tool_input,
        } => vec![format!(
            "tool: {tool_name}({})",
            Value::Object(tool_input.clone())
        )],
        Event::ToolResult { result } => {
            let mut lines = vec!["🟩 Tool result:".to_string()];
            lines.extend(tool_result_lines(result).into_iter().map(|l| format!("  {l}")));
            lines
        }
        Event::Unrecognized(value) => vec![format!("⚠ Unknown event: {value}")],
        // Stages open groups and tokens are coalesced, so neither shows up
        // as an item.
        Event::Stage { label } => vec![format!("stage: {label}")],
        Event::Token { text, .. } => vec![text.clone()],
    }
}

/// Error results show their message and validation details; everything
/// else is pretty-printed.
fn tool_result_lines(result: &Value) -> Vec<String> {
    match result {
        Value::Object(map) if map.get("status").and_then(Value::as_str) == Some("error") => {
            let message = map
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("An error occurred.");
            let mut lines = vec![format!("Tool error: {message}")];
            if let Some(details) = map.get("details").and_then(Value::as_array) {
                lines.push("Validation issues:".to_string());
                for detail in details {
                    let loc = detail
                        .get("loc")
                        .and_then(Value::as_array)
                        .map(|parts| {
                            parts
                                .iter()
                                .map(|p| match p {
                                    Value::String(s) => s.clone(),
                                    other => other.to_string(),
                                })
                                .collect::<Vec<_>>()
                                .join(".")
                        })
                        .unwrap_or_default();
                    let msg = detail.get("msg").and_then(Value::as_str).unwrap_or("");
                    lines.push(format!("→ {loc}: {msg}"));
                }
            }
            lines
        }
        Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(result)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect(),
        Value::String(text) => text.lines().map(str::to_string).collect(),
        other => vec![other.to_string()],
    }
}
