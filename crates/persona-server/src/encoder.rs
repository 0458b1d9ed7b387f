//! Server-Sent Events framing for completion streams.
//!
//! Wire format, one event per blank-line-terminated block:
//! - `: keepalive` while nothing else happens for the keepalive interval
//! - `data: {"delta": "..."}` for newly visible text
//! - `data: {"done": true}` or `data: {"error": "..."}`, exactly once, last
//!
//! The stream returned by [`event_stream`] drives the whole request after
//! validation: it waits at the gate (emitting keepalives), hands the session
//! to the producer and relays its events. Dropping the stream trips the
//! session's cancellation.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    http::{header, HeaderValue},
    response::{
        sse::{Event, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::Stream;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cancel::CancelController;
use crate::config::StreamSection;
use crate::gate::{EngineGate, Ticket};
use crate::producer;
use crate::session::{GenerationSession, SessionState};

pub const CONTENT_TYPE: &str = "text/event-stream; charset=utf-8";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Keepalive,
    Done,
    Error(String),
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error(_))
    }

    pub fn into_event(self) -> Event {
        match self {
            StreamEvent::Keepalive => Event::default().comment("keepalive"),
            StreamEvent::Delta(text) => Event::default().data(json!({ "delta": text }).to_string()),
            StreamEvent::Done => Event::default().data(json!({ "done": true }).to_string()),
            StreamEvent::Error(message) => {
                Event::default().data(json!({ "error": message }).to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EncoderConfig {
    pub keepalive: Duration,
    pub stall_timeout: Duration,
    pub channel_capacity: usize,
}

impl From<&StreamSection> for EncoderConfig {
    fn from(stream: &StreamSection) -> Self {
        Self {
            keepalive: stream.keepalive(),
            stall_timeout: stream.stall_timeout(),
            channel_capacity: stream.channel_capacity.max(1),
        }
    }
}

enum Wait {
    Granted(Ticket),
    Tick,
    Shutdown,
}

enum Relay {
    Event(Option<StreamEvent>),
    Tick,
}

/// The SSE event stream for one validated session.
pub fn event_stream(
    gate: EngineGate,
    mut session: GenerationSession,
    cancel: CancelController,
    config: EncoderConfig,
) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
    async_stream::stream! {
        let mut guard = cancel.guard();
        let token = cancel.token();
        let id = session.id();
        if let Err(e) = session.advance(SessionState::Gating) {
            tracing::warn!(parent: session.span(), error = %e, "ignored session transition");
        }

        let acquire = gate.acquire(id);
        tokio::pin!(acquire);
        let mut ticker = tokio::time::interval_at(Instant::now() + config.keepalive, config.keepalive);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let ticket = loop {
            let step = tokio::select! {
                ticket = &mut acquire => Wait::Granted(ticket),
                () = token.cancelled() => Wait::Shutdown,
                _ = ticker.tick() => Wait::Tick,
            };
            match step {
                Wait::Granted(ticket) => break Some(ticket),
                Wait::Shutdown => break None,
                Wait::Tick => yield Ok(StreamEvent::Keepalive.into_event()),
            }
        };

        match ticket {
            None => {
                // cancelled while queued, the engine was never touched
                if let Err(e) = session.advance(SessionState::Closed) {
                    tracing::warn!(parent: session.span(), error = %e, "ignored session transition");
                }
                tracing::debug!(parent: session.span(), history = ?session.history(), "session closed");
                guard.disarm();
                yield Ok(StreamEvent::Done.into_event());
            }
            Some(ticket) => {
                let (tx, mut rx) = mpsc::channel(config.channel_capacity);
                producer::spawn(session, ticket, cancel.clone(), tx, config.stall_timeout);

                // one keepalive deadline spans queueing and streaming
                let mut terminated = false;
                while !terminated {
                    let step = tokio::select! {
                        event = rx.recv() => Relay::Event(event),
                        _ = ticker.tick() => Relay::Tick,
                    };
                    let event = match step {
                        Relay::Event(Some(event)) => event,
                        Relay::Event(None) => break,
                        Relay::Tick => {
                            yield Ok(StreamEvent::Keepalive.into_event());
                            continue;
                        }
                    };
                    if event.is_terminal() {
                        terminated = true;
                        guard.disarm();
                    }
                    yield Ok(event.into_event());
                    ticker.reset();
                }
                if !terminated {
                    tracing::error!(session = %id, "producer exited without a terminal event");
                    guard.disarm();
                    yield Ok(StreamEvent::Error("generation ended unexpectedly".into()).into_event());
                }
            }
        }
    }
}

/// Wrap an event stream in a response with the gateway's SSE headers.
pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn encode(events: Vec<StreamEvent>) -> String {
        let stream = futures::stream::iter(events.into_iter().map(|e| Ok(e.into_event())));
        let body = sse_response(stream).into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn frames_every_event_kind() {
        let wire = encode(vec![
            StreamEvent::Keepalive,
            StreamEvent::Delta("Sapere \"aude\"\n".into()),
            StreamEvent::Done,
        ])
        .await;
        assert_eq!(
            wire,
            ": keepalive\n\ndata: {\"delta\":\"Sapere \\\"aude\\\"\\n\"}\n\ndata: {\"done\":true}\n\n"
        );
        assert_eq!(
            encode(vec![StreamEvent::Error("boom".into())]).await,
            "data: {\"error\":\"boom\"}\n\n"
        );
    }

    #[tokio::test]
    async fn response_headers() {
        let response = sse_response(futures::stream::empty::<Result<Event, Infallible>>());
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], CONTENT_TYPE);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::Done.is_terminal());
        assert!(StreamEvent::Error(String::new()).is_terminal());
        assert!(!StreamEvent::Keepalive.is_terminal());
        assert!(!StreamEvent::Delta("x".into()).is_terminal());
    }
}
