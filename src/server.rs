use crate::protocol::{AskRequest, Event, Segment};
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use serde_json::{Map, Value, json};
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

pub const MOCK_NOTE: &str = "Mock backend: answer assembled from canned requirements.";

const NDJSON: &str = "application/x-ndjson";

pub struct ServerConfig {
    pub listen: String,
    /// Pause between streamed lines.
    pub line_delay: Duration,
}

struct ServerState {
    started_at: Instant,
    line_delay: Duration,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let listener = TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "mock backend listening");
    println!("mock backend listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(config.line_delay)).await?;

    Ok(())
}

pub fn router(line_delay: Duration) -> axum::Router {
    let state = Arc::new(ServerState {
        started_at: Instant::now(),
        line_delay,
    });

    axum::Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/ask_full", post(ask))
        .route("/ask_mock_full", post(ask))
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({ "service": "pci-compliance-agent", "status": "ok" }))
}

async fn healthz(State(state): State<Arc<ServerState>>) -> Json<Value> {
    let uptime = state.started_at.elapsed().as_secs_f64();
    Json(json!({ "ok": true, "uptime_sec": (uptime * 1000.0).round() / 1000.0 }))
}

async fn ask(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<AskRequest>,
) -> impl IntoResponse {
    let events = script(&payload.message);
    debug!(events = events.len(), "replaying scripted run");

    let (tx, rx) = mpsc::channel::<Result<String, Infallible>>(16);
    let delay = state.line_delay;
    tokio::spawn(async move {
        for event in events {
            if tx.send(Ok(event.to_line())).await.is_err() {
                debug!("client went away mid-stream");
                break;
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    });

    ([(CONTENT_TYPE, NDJSON)], Body::from_stream(ReceiverStream::new(rx)))
}

struct Requirement {
    id: &'static str,
    text: &'static str,
}

const REQUIREMENTS: &[Requirement] = &[
    Requirement {
        id: "3.5.1",
        text: "PAN is rendered unreadable anywhere it is stored using one-way hashes, truncation, index tokens or strong cryptography with key management.",
    },
    Requirement {
        id: "3.6.1",
        text: "Procedures are defined and implemented to protect cryptographic keys used to protect stored account data against disclosure and misuse.",
    },
    Requirement {
        id: "3.7.1",
        text: "Key-management policies include generation of strong cryptographic keys.",
    },
];

/// The events one mock run streams back, shaped like the real pipeline:
/// routing plan, tool round, then the answer.
pub fn script(message: &str) -> Vec<Event> {
    let message = message.trim();
    if message.is_empty() {
        return vec![Event::Error {
            message: "Plan contained no actions.".to_string(),
            stage: Some("validate_plan".to_string()),
        }];
    }

    let mut tool_input = Map::new();
    tool_input.insert("query".to_string(), Value::from(message));
    let plan = json!({ "tool_name": "search", "tool_input": tool_input });

    let hits: Vec<Value> = REQUIREMENTS
        .iter()
        .map(|r| json!({ "id": r.id, "text": r.text }))
        .collect();
    let summary: String = REQUIREMENTS
        .iter()
        .map(|r| format!("- {}: {}\n", r.id, r.text))
        .collect();

    let mut events = vec![
        Event::Stage {
            label: "Routing".to_string(),
        },
        Event::Token {
            text: format!("{plan}\n"),
            segment: Some(Segment::Materials),
        },
        Event::Stage {
            label: "Tools".to_string(),
        },
        Event::ToolCall {
            tool_name: "search".to_string(),
            tool_input,
        },
        Event::ToolResult {
            result: json!({ "status": "success", "tool_name": "search", "result": hits }),
        },
        Event::Token {
            text: format!("Retrieved materials\n\n\n{summary}"),
            segment: Some(Segment::Materials),
        },
        Event::Info {
            message: MOCK_NOTE.to_string(),
        },
        Event::Stage {
            label: "Answer".to_string(),
        },
    ];

    let answer = format!(
        "Based on the retrieved requirements, {} {} and {} apply to \"{message}\": \
         render stored PAN unreadable and manage the keys that protect it.",
        REQUIREMENTS[0].id, REQUIREMENTS[1].id, REQUIREMENTS[2].id
    );
    events.extend(answer.split_inclusive(' ').map(|word| Event::Token {
        text: word.to_string(),
        segment: Some(Segment::Answer),
    }));

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::turn::{Accumulator, Turn};

    #[test]
    fn script_follows_pipeline_shape() {
        let events = script("key rotation");
        let stages: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Stage { label } => Some(label.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(stages, vec!["Routing", "Tools", "Answer"]);
        assert!(matches!(events.last(), Some(Event::Token { segment: Some(Segment::Answer), .. })));
    }

    #[test]
    fn scripted_run_fills_both_buffers() {
        let mut acc = Accumulator::new();
        let turn = script("key rotation")
            .iter()
            .fold(Turn::new("key rotation"), |turn, event| acc.apply(turn, event))
            .finalize();
        assert!(turn.materials.contains("Retrieved materials\n\n- 3.5.1"));
        assert!(turn.answer.contains("\"key rotation\""));
        assert_eq!(turn.error, None);
    }

    #[test]
    fn blank_message_is_rejected() {
        assert_eq!(
            script("  "),
            vec![Event::Error {
                message: "Plan contained no actions.".into(),
                stage: Some("validate_plan".into()),
            }]
        );
    }
}
