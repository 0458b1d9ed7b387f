//! Integration tests for the persona-engine trait and types.
//!
//! Validates:
//! - GenerationEngine can be implemented by simple backends
//! - Activation is all-or-nothing
//! - Fragment sequences stop on budget and on cancellation
//! - Boxed trait objects dispatch correctly
//! - Error types display with context

use persona_engine::*;
use std::path::PathBuf;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Mock Backends
// ---------------------------------------------------------------------------

/// Echo backend: emits the prompt's words, prefixed by the active persona id.
#[derive(Default)]
struct EchoEngine {
    active: Option<PersonaHandle>,
}

impl GenerationEngine for EchoEngine {
    fn activate(&mut self, persona: &PersonaHandle) -> Result<()> {
        if persona.id().is_empty() {
            self.active = None;
            return Err(EngineError::Activation {
                persona: String::new(),
                reason: "empty id".into(),
            });
        }
        self.active = Some(persona.clone());
        Ok(())
    }

    fn deactivate(&mut self) {
        self.active = None;
    }

    fn active_persona(&self) -> Option<&PersonaHandle> {
        self.active.as_ref()
    }

    fn generate(
        &mut self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancellationToken,
    ) -> Result<Fragments<'_>> {
        params.validate()?;
        let persona = self.active.clone().ok_or(EngineError::NoActivePersona)?;
        let words: Vec<String> = prompt
            .split_whitespace()
            .map(|w| format!("{}:{} ", persona.id(), w))
            .collect();
        let budget = params.max_output_tokens;
        Ok(Box::new(
            words
                .into_iter()
                .take(budget)
                .take_while(move |_| !cancel.is_cancelled())
                .map(Ok),
        ))
    }
}

fn persona(id: &str) -> PersonaHandle {
    let delta = LoraDelta::new(1, 1.0, 2, 2, vec![0.0; 2], vec![0.0; 2]).unwrap();
    Arc::new(Persona::new(id, "instruction", delta, PathBuf::from("/adapters")))
}

// ---------------------------------------------------------------------------
// Trait Implementation Tests
// ---------------------------------------------------------------------------

#[test]
fn generate_requires_active_persona() {
    let mut engine = EchoEngine::default();
    let err = engine
        .generate("hallo welt", &SamplingParams::default(), CancellationToken::new())
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::NoActivePersona));
}

#[test]
fn activate_then_generate_uses_persona() {
    let mut engine = EchoEngine::default();
    engine.activate(&persona("kant")).unwrap();
    let out: Vec<String> = engine
        .generate("hallo welt", &SamplingParams::default(), CancellationToken::new())
        .unwrap()
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(out, vec!["kant:hallo ", "kant:welt "]);
}

#[test]
fn failed_activation_leaves_no_active_persona() {
    let mut engine = EchoEngine::default();
    engine.activate(&persona("marx")).unwrap();
    assert!(engine.activate(&persona("")).is_err());
    assert!(engine.active_persona().is_none());
}

#[test]
fn budget_limits_fragments() {
    let mut engine = EchoEngine::default();
    engine.activate(&persona("kant")).unwrap();
    let params = SamplingParams {
        max_output_tokens: 1,
        ..Default::default()
    };
    let count = engine
        .generate("a b c d", &params, CancellationToken::new())
        .unwrap()
        .count();
    assert_eq!(count, 1);
}

#[test]
fn cancelled_token_stops_sequence() {
    let mut engine = EchoEngine::default();
    engine.activate(&persona("kant")).unwrap();
    let cancel = CancellationToken::new();
    let mut fragments = engine
        .generate("a b c d", &SamplingParams::default(), cancel.clone())
        .unwrap();
    assert!(fragments.next().is_some());
    cancel.cancel();
    assert!(fragments.next().is_none());
}

#[test]
fn invalid_params_rejected_before_generation() {
    let mut engine = EchoEngine::default();
    engine.activate(&persona("kant")).unwrap();
    let params = SamplingParams {
        temperature: -1.0,
        ..Default::default()
    };
    let err = engine
        .generate("a", &params, CancellationToken::new())
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::InvalidParams(_)));
}

// ---------------------------------------------------------------------------
// Trait Object Tests
// ---------------------------------------------------------------------------

#[test]
fn boxed_engine_dispatches() {
    let mut engine: Box<dyn GenerationEngine> = Box::new(EchoEngine::default());
    engine.activate(&persona("gehlen")).unwrap();
    assert_eq!(engine.active_persona().unwrap().id(), "gehlen");
    engine.deactivate();
    assert!(engine.active_persona().is_none());
}

#[test]
fn boxed_engine_can_move_across_threads() {
    let mut engine: Box<dyn GenerationEngine> = Box::new(EchoEngine::default());
    let handle = std::thread::spawn(move || {
        engine.activate(&persona("plessner")).unwrap();
        engine
            .generate("eins zwei", &SamplingParams::default(), CancellationToken::new())
            .unwrap()
            .count()
    });
    assert_eq!(handle.join().unwrap(), 2);
}

// ---------------------------------------------------------------------------
// Error Type Tests
// ---------------------------------------------------------------------------

#[test]
fn activation_error_display() {
    let err = EngineError::Activation {
        persona: "kant".into(),
        reason: "rank mismatch".into(),
    };
    let msg = err.to_string();
    assert!(msg.contains("kant"));
    assert!(msg.contains("rank mismatch"));
}

#[test]
fn error_is_std_error() {
    let err: Box<dyn std::error::Error> = Box::new(EngineError::Inference("nan logits".into()));
    assert!(err.to_string().contains("nan logits"));
}
