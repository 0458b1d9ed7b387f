//! Runs one generation on a blocking worker thread.
//!
//! The producer owns the session and the gate ticket. It activates the
//! persona, forwards visible text as `Delta` events and finishes with exactly
//! one terminal event. The ticket is dropped before that terminal event is
//! sent, on every path.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

use persona_engine::GenerationEngine;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cancel::{CancelController, CancelReason};
use crate::encoder::StreamEvent;
use crate::gate::Ticket;
use crate::session::{GenerationSession, SessionState};

enum Outcome {
    Completed,
    Cancelled,
    Fault(String),
}

struct Producer {
    handle: Handle,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancelController,
    stall_timeout: Duration,
}

/// Start the producer for `session`. Must be called from within a runtime.
pub fn spawn(
    session: GenerationSession,
    ticket: Ticket,
    cancel: CancelController,
    tx: mpsc::Sender<StreamEvent>,
    stall_timeout: Duration,
) -> JoinHandle<()> {
    let producer = Producer {
        handle: Handle::current(),
        tx,
        cancel,
        stall_timeout,
    };
    tokio::task::spawn_blocking(move || producer.run(session, ticket))
}

impl Producer {
    fn run(self, mut session: GenerationSession, mut ticket: Ticket) {
        let span = session.span().clone();
        let _entered = span.enter();
        advance(&mut session, SessionState::Activating);

        let outcome = match catch_unwind(AssertUnwindSafe(|| {
            self.generate(&mut session, ticket.engine())
        })) {
            Ok(outcome) => outcome,
            Err(panic) => Outcome::Fault(format!("engine panicked: {}", panic_message(&*panic))),
        };

        if let Outcome::Fault(message) = &outcome {
            tracing::error!(error = %message, "generation failed");
            ticket.engine().deactivate();
        }
        advance(&mut session, SessionState::Finishing);
        drop(ticket);

        let terminal = match outcome {
            Outcome::Completed => StreamEvent::Done,
            Outcome::Cancelled => {
                tracing::debug!(reason = ?self.cancel.reason(), "generation stopped early");
                StreamEvent::Done
            }
            Outcome::Fault(message) => StreamEvent::Error(message),
        };
        // best effort: the encoder may already be gone
        self.send(terminal);
        advance(&mut session, SessionState::Closed);
        tracing::debug!(history = ?session.history(), "session closed");
    }

    fn generate(&self, session: &mut GenerationSession, engine: &mut dyn GenerationEngine) -> Outcome {
        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        if let Err(e) = engine.activate(session.persona()) {
            return Outcome::Fault(e.to_string());
        }
        advance(session, SessionState::Streaming);

        let fragments = match engine.generate(session.prompt(), session.params(), self.cancel.token()) {
            Ok(fragments) => fragments,
            Err(e) => return Outcome::Fault(e.to_string()),
        };
        for item in fragments {
            let fragment = match item {
                Ok(fragment) => fragment,
                Err(e) => return Outcome::Fault(e.to_string()),
            };
            if let Some(delta) = session.visible_mut().push(&fragment) {
                if !self.send_delta(delta) {
                    return Outcome::Cancelled;
                }
            }
        }

        if self.cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        if let Some(rest) = session.visible_mut().finish() {
            if !self.send_delta(rest) {
                return Outcome::Cancelled;
            }
        }
        Outcome::Completed
    }

    fn send_delta(&self, text: String) -> bool {
        !self.cancel.is_cancelled() && self.send(StreamEvent::Delta(text))
    }

    /// Hand an event to the encoder, waiting at most the stall timeout.
    fn send(&self, event: StreamEvent) -> bool {
        let sent = self
            .handle
            .block_on(tokio::time::timeout(self.stall_timeout, self.tx.send(event)));
        match sent {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                self.cancel.trip(CancelReason::ChannelClosed);
                false
            }
            Err(_) => {
                self.cancel.trip(CancelReason::Stall);
                false
            }
        }
    }
}

fn advance(session: &mut GenerationSession, next: SessionState) {
    if let Err(e) = session.advance(next) {
        tracing::warn!(error = %e, "ignored session transition");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::EngineGate;
    use persona_engine::{CancellationToken, LoraDelta, Persona, SamplingParams};
    use persona_runtime::{Fault, ScriptedEngine};
    use std::sync::Arc;

    fn session(id: &str) -> GenerationSession {
        let delta = LoraDelta::new(1, 1.0, 1, 1, vec![0.0], vec![0.0]).unwrap();
        let persona = Arc::new(Persona::new(id, "", delta, "unused"));
        let params = SamplingParams {
            max_output_tokens: 3,
            ..Default::default()
        };
        let mut session = GenerationSession::new(persona, "p".into(), params, true);
        session.advance(SessionState::Gating).unwrap();
        session
    }

    async fn run(engine: ScriptedEngine, cancel: Option<&CancelController>) -> (Vec<StreamEvent>, EngineGate) {
        let gate = EngineGate::new(Box::new(engine));
        let session = session("kant");
        let ticket = gate.acquire(session.id()).await;
        let cancel = cancel
            .cloned()
            .unwrap_or_else(|| CancelController::new(&CancellationToken::new(), session.id()));
        let (tx, mut rx) = mpsc::channel(16);
        spawn(session, ticket, cancel, tx, Duration::from_secs(5)).await.unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (events, gate)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completes_with_done() {
        let (events, gate) = run(ScriptedEngine::new(), None).await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("kant-0 ".into()),
                StreamEvent::Delta("kant-1 ".into()),
                StreamEvent::Delta("kant-2 ".into()),
                StreamEvent::Done,
            ]
        );
        assert_eq!(gate.stats().released, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn engine_error_becomes_error_event() {
        let (events, gate) = run(ScriptedEngine::new().with_fault(Fault::ErrorAt(1)), None).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], StreamEvent::Error(_)));
        assert_eq!(gate.stats().released, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn panic_is_contained_and_engine_reset() {
        let (events, gate) = run(ScriptedEngine::new().with_fault(Fault::PanicAt(0)), None).await;
        match events.as_slice() {
            [StreamEvent::Error(message)] => assert!(message.contains("panicked")),
            other => panic!("unexpected events {other:?}"),
        }
        let mut ticket = gate.try_acquire(uuid::Uuid::new_v4()).unwrap();
        assert!(ticket.engine().active_persona().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancelled_before_activation_sends_only_done() {
        let engine = ScriptedEngine::new();
        let probe = engine.probe();
        let cancel = CancelController::new(&CancellationToken::new(), uuid::Uuid::new_v4());
        cancel.trip(CancelReason::Shutdown);
        let (events, _) = run(engine, Some(&cancel)).await;
        assert_eq!(events, vec![StreamEvent::Done]);
        assert!(probe.activations().is_empty());
    }

    #[test]
    fn panic_messages() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(&*boxed), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7);
        assert_eq!(panic_message(&*boxed), "unknown panic");
    }
}
