use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use persona_engine::{
    CancellationToken, EngineError, GenerationEngine, LoraDelta, Persona, PersonaHandle,
    SamplingParams,
};
use persona_runtime::{Fault, ScriptedEngine};

fn persona(id: &str) -> PersonaHandle {
    let delta = LoraDelta::new(1, 1.0, 1, 1, vec![0.0], vec![0.0]).unwrap();
    Arc::new(Persona::new(id, "", delta, "unused"))
}

fn params(max_output_tokens: usize) -> SamplingParams {
    SamplingParams {
        max_output_tokens,
        ..Default::default()
    }
}

#[test]
fn replays_script_then_stops() {
    let mut engine = ScriptedEngine::new().with_script("kant", ["Die ", "Vernunft."]);
    engine.activate(&persona("kant")).unwrap();
    let out: Vec<String> = engine
        .generate("p", &params(10), CancellationToken::new())
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(out, vec!["Die ", "Vernunft."]);
}

#[test]
fn default_script_is_tagged_and_budgeted() {
    let mut engine = ScriptedEngine::new();
    engine.activate(&persona("marx")).unwrap();
    let out: String = engine
        .generate("p", &params(3), CancellationToken::new())
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(out, "marx-0 marx-1 marx-2 ");
}

#[test]
fn probe_tracks_activity() {
    let mut engine = ScriptedEngine::new();
    let probe = engine.probe();
    engine.activate(&persona("kant")).unwrap();
    {
        let mut first = engine
            .generate("hallo", &params(5), CancellationToken::new())
            .unwrap();
        first.next();
        assert_eq!(probe.in_flight(), 1);
    }
    assert_eq!(probe.in_flight(), 0);
    assert_eq!(probe.max_in_flight(), 1);
    assert_eq!(probe.activations(), vec!["kant"]);
    assert_eq!(probe.prompts(), vec!["hallo"]);
    assert_eq!(probe.generations(), 1);
    assert_eq!(probe.fragments(), 1);
}

#[test]
fn error_fault_ends_stream() {
    let mut engine = ScriptedEngine::new().with_fault(Fault::ErrorAt(1));
    engine.activate(&persona("kant")).unwrap();
    let out: Vec<_> = engine
        .generate("p", &params(10), CancellationToken::new())
        .unwrap()
        .collect();
    assert_eq!(out.len(), 2);
    assert!(out[0].is_ok());
    assert!(matches!(out[1], Err(EngineError::Inference(_))));
}

#[test]
fn panic_fault_unwinds_and_releases_probe() {
    let mut engine = ScriptedEngine::new().with_fault(Fault::PanicAt(0));
    let probe = engine.probe();
    engine.activate(&persona("kant")).unwrap();
    let result = catch_unwind(AssertUnwindSafe(|| {
        engine
            .generate("p", &params(10), CancellationToken::new())
            .unwrap()
            .count()
    }));
    assert!(result.is_err());
    assert_eq!(probe.in_flight(), 0);
}

#[test]
fn rejected_activation_clears_persona() {
    let mut engine = ScriptedEngine::new().with_fault(Fault::RejectActivation("marx".into()));
    engine.activate(&persona("kant")).unwrap();
    assert!(engine.activate(&persona("marx")).is_err());
    assert!(engine.active_persona().is_none());
}

#[test]
fn cancellation_bounds_extra_work() {
    let mut engine = ScriptedEngine::new().with_fragment_delay(Duration::from_millis(20));
    engine.activate(&persona("kant")).unwrap();
    let cancel = CancellationToken::new();
    let mut fragments = engine.generate("p", &params(1000), cancel.clone()).unwrap();

    assert!(fragments.next().is_some());
    cancel.cancel();
    let start = Instant::now();
    assert!(fragments.next().is_none());
    assert!(start.elapsed() < Duration::from_millis(20));
}
