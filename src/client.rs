use crate::config::{ApiBase, Backend};
use crate::lines::LineReassembler;
use crate::protocol::{AskRequest, Event, decode_line};
use crate::turn::{Accumulator, Turn};
use futures::StreamExt;
use reqwest::{Client as HttpClient, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
}

type ClientResult<T> = Result<T, ClientError>;

/// How a stream stopped delivering events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The body ended, or the backend answered with an error status. It does
    /// not mean the turn succeeded.
    Completed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AskClient {
    base: ApiBase,
    http: HttpClient,
}

impl AskClient {
    pub fn new(base: ApiBase) -> Self {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| HttpClient::new());
        Self { base, http }
    }

    pub fn base(&self) -> &ApiBase {
        &self.base
    }

    /// POST one question and hand every decoded event to `on_event`, in
    /// order. Error statuses become a synthesized error event; transport
    /// failures are returned.
    pub async fn run<F>(
        &self,
        path: &str,
        request: &AskRequest,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> ClientResult<StreamEnd>
    where
        F: FnMut(Event),
    {
        let url = self.base.join(path);
        debug!(%url, "sending question");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(StreamEnd::Cancelled),
            response = self.http.post(&url).json(request).send() => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %url, "backend rejected question");
            on_event(Event::Error {
                message: status_message(status, &body),
                stage: None,
            });
            return Ok(StreamEnd::Completed);
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineReassembler::new();

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("stream cancelled");
                    return Ok(StreamEnd::Cancelled);
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else {
                break;
            };

            for line in lines.push(&chunk?) {
                if cancel.is_cancelled() {
                    return Ok(StreamEnd::Cancelled);
                }
                if let Some(event) = decode_line(&line) {
                    debug!(kind = event.kind(), "event");
                    on_event(event);
                }
            }
        }

        if let Some(event) = lines.finish().as_deref().and_then(decode_line) {
            on_event(event);
        }

        debug!("stream ended");
        Ok(StreamEnd::Completed)
    }

    /// Stream one turn to completion. `observe` sees the turn after every
    /// event; the returned turn is always done.
    pub async fn ask<F>(
        &self,
        backend: Backend,
        turn: Turn,
        cancel: &CancellationToken,
        mut observe: F,
    ) -> Turn
    where
        F: FnMut(&Turn, &Event),
    {
        let request = AskRequest {
            message: turn.question.clone(),
        };
        let mut turn = turn;
        let mut acc = Accumulator::new();

        let outcome = self
            .run(backend.path(), &request, cancel, |event| {
                let before = acc.phase();
                turn = acc.apply(std::mem::take(&mut turn), &event);
                if acc.phase() != before {
                    debug!(turn = %turn.id, phase = ?acc.phase(), "phase advanced");
                }
                observe(&turn, &event);
            })
            .await;

        match outcome {
            Ok(StreamEnd::Completed) => turn.finalize(),
            Ok(StreamEnd::Cancelled) => turn.cancel(),
            Err(err) => {
                warn!(error = %err, turn = %turn.id, "stream failed");
                let event = Event::Error {
                    message: err.to_string(),
                    stage: Some("transport".to_string()),
                };
                turn = acc.apply(turn, &event);
                observe(&turn, &event);
                turn.finalize()
            }
        }
    }
}

fn status_message(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status} - {body}")
    }
}
