//! Deterministic engine driven by fixed per-persona scripts.
//!
//! Used for load demos and for exercising the gateway without a model: each
//! persona replays its script one fragment per `fragment_delay`, and an
//! [`EngineProbe`] records what the engine saw.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use persona_engine::{
    CancellationToken, EngineError, Fragments, GenerationEngine, PersonaHandle, SamplingParams,
};

/// Injected misbehaviour.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Yield an engine error in place of the fragment at this index.
    ErrorAt(usize),
    /// Panic while producing the fragment at this index.
    PanicAt(usize),
    /// Fail activation of this persona id.
    RejectActivation(String),
}

#[derive(Debug, Default)]
struct ProbeState {
    activations: Mutex<Vec<String>>,
    prompts: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    generations: AtomicUsize,
    fragments: AtomicUsize,
}

/// Shared view of what a [`ScriptedEngine`] has done. Cloning is cheap.
#[derive(Debug, Clone, Default)]
pub struct EngineProbe {
    inner: Arc<ProbeState>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl EngineProbe {
    /// Persona ids in activation order (including rejected ones).
    pub fn activations(&self) -> Vec<String> {
        lock(&self.inner.activations).clone()
    }

    /// Prompts passed to `generate`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.inner.prompts).clone()
    }

    /// Fragment iterators currently alive.
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of fragment iterators ever alive at once.
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn generations(&self) -> usize {
        self.inner.generations.load(Ordering::SeqCst)
    }

    /// Fragments yielded across all generations.
    pub fn fragments(&self) -> usize {
        self.inner.fragments.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ScriptedEngine {
    scripts: HashMap<String, Vec<String>>,
    fragment_delay: Duration,
    fault: Option<Fault>,
    active: Option<PersonaHandle>,
    probe: EngineProbe,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed fragments for `persona`. Personas without a script emit
    /// `"<id>-<n> "` until the token budget runs out.
    pub fn with_script<I, S>(mut self, persona: &str, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scripts.insert(
            persona.to_lowercase(),
            fragments.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = delay;
        self
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn probe(&self) -> EngineProbe {
        self.probe.clone()
    }
}

impl GenerationEngine for ScriptedEngine {
    fn activate(&mut self, persona: &PersonaHandle) -> persona_engine::Result<()> {
        self.active = None;
        lock(&self.probe.inner.activations).push(persona.id().to_string());
        if matches!(&self.fault, Some(Fault::RejectActivation(id)) if id == persona.id()) {
            return Err(EngineError::Activation {
                persona: persona.id().to_string(),
                reason: "rejected by fault injection".into(),
            });
        }
        self.active = Some(Arc::clone(persona));
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
    ) -> persona_engine::Result<Fragments<'_>> {
        let persona = self.active.clone().ok_or(EngineError::NoActivePersona)?;
        params.validate()?;

        let probe = &self.probe.inner;
        lock(&probe.prompts).push(prompt.to_string());
        probe.generations.fetch_add(1, Ordering::SeqCst);
        let now = probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        probe.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let script = self.scripts.get(persona.id()).cloned();
        Ok(Box::new(ScriptStream {
            persona: persona.id().to_string(),
            script,
            index: 0,
            budget: params.max_output_tokens,
            delay: self.fragment_delay,
            fault: self.fault.clone(),
            cancel,
            probe: self.probe.clone(),
        }))
    }
}

struct ScriptStream {
    persona: String,
    script: Option<Vec<String>>,
    index: usize,
    budget: usize,
    delay: Duration,
    fault: Option<Fault>,
    cancel: CancellationToken,
    probe: EngineProbe,
}

impl Iterator for ScriptStream {
    type Item = persona_engine::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() || self.index >= self.budget {
            return None;
        }
        let fragment = match &self.script {
            Some(script) => script.get(self.index)?.clone(),
            None => format!("{}-{} ", self.persona, self.index),
        };

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let index = self.index;
        self.index += 1;
        match self.fault {
            Some(Fault::ErrorAt(at)) if at == index => {
                // end the stream after the fault
                self.budget = 0;
                return Some(Err(EngineError::Inference(format!(
                    "injected fault at fragment {index}"
                ))));
            }
            Some(Fault::PanicAt(at)) if at == index => {
                panic!("injected panic at fragment {index}");
            }
            _ => {}
        }

        self.probe.inner.fragments.fetch_add(1, Ordering::SeqCst);
        Some(Ok(fragment))
    }
}

impl Drop for ScriptStream {
    fn drop(&mut self) {
        self.probe.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}
