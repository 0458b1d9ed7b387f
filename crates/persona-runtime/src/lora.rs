//! The reference [`GenerationEngine`]: one base model, one active LoRA delta.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use persona_engine::{
    CancellationToken, EngineError, Fragments, GenerationEngine, LoraDelta, Persona,
    PersonaHandle, SamplingParams,
};
use persona_sampling::Sampler;
use persona_tokenizer::{DecodingState, TokenId, Tokenizer};

use crate::base::BaseModel;
use crate::error::{Result, RuntimeError};
use crate::telemetry::{GenerationTimer, NoopTelemetry, StopReason, TelemetryHook};

/// Build the model input for `persona` and a user prompt.
pub fn render_prompt(persona: &Persona, prompt: &str) -> String {
    format!("{}\n\nFrage: {}\nAntwort:", persona.instruction(), prompt.trim())
}

pub struct LoraEngine {
    base: BaseModel,
    active: Option<PersonaHandle>,
    telemetry: Arc<dyn TelemetryHook>,
}

impl LoraEngine {
    pub fn new(base: BaseModel) -> Self {
        Self {
            base,
            active: None,
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn load(dir: &std::path::Path) -> Result<Self> {
        Ok(Self::new(BaseModel::load(dir)?))
    }

    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn base(&self) -> &BaseModel {
        &self.base
    }

    /// Check that `persona`'s delta fits this base model's output projection.
    pub fn check(&self, persona: &Persona) -> Result<()> {
        let delta = persona.delta();
        let incompatible = |reason: String| RuntimeError::Incompatible {
            persona: persona.id().to_string(),
            reason,
        };
        if delta.d_in() != self.base.hidden_size() {
            return Err(incompatible(format!(
                "adapter input dim {} != hidden size {}",
                delta.d_in(),
                self.base.hidden_size()
            )));
        }
        if delta.d_out() != self.base.vocab_size() {
            return Err(incompatible(format!(
                "adapter output dim {} != vocab size {}",
                delta.d_out(),
                self.base.vocab_size()
            )));
        }
        if delta.a().iter().chain(delta.b()).any(|v| !v.is_finite()) {
            return Err(incompatible("adapter contains non-finite weights".into()));
        }
        Ok(())
    }
}

impl GenerationEngine for LoraEngine {
    fn activate(&mut self, persona: &PersonaHandle) -> persona_engine::Result<()> {
        if let Some(current) = &self.active {
            if Arc::ptr_eq(current, persona) {
                return Ok(());
            }
        }
        // all-or-nothing: nothing stays active if the new delta is rejected
        self.active = None;
        self.check(persona).map_err(|e| EngineError::Activation {
            persona: persona.id().to_string(),
            reason: e.to_string(),
        })?;
        self.active = Some(Arc::clone(persona));
        tracing::debug!(persona = persona.id(), "activated persona");
        Ok(())
    }

    fn deactivate(&mut self) {
        if let Some(persona) = self.active.take() {
            tracing::debug!(persona = persona.id(), "deactivated persona");
        }
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

        let input = render_prompt(&persona, prompt);
        let tokens = self
            .base
            .tokenizer()
            .encode(&input)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        let mut state = self.base.initial_state();
        for &token in &tokens {
            self.base.step(&mut state, token);
        }

        let seed = params.seed.unwrap_or_else(clock_seed);
        let sampler = Sampler::new()
            .with_temperature(params.temperature)
            .with_nucleus_p(params.nucleus_p)
            .with_repetition_penalty(params.repetition_penalty)
            .with_seed(seed);

        let timer = GenerationTimer::new(persona.id(), tokens.len(), Arc::clone(&self.telemetry));

        Ok(Box::new(LoraStream {
            base: &self.base,
            persona,
            state,
            history: Vec::new(),
            budget: params.max_output_tokens,
            sampler,
            decoding: DecodingState::new(),
            cancel,
            timer: Some(timer),
        }))
    }
}

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(42)
}

/// Fragment iterator of one [`LoraEngine`] generation.
struct LoraStream<'a> {
    base: &'a BaseModel,
    persona: PersonaHandle,
    state: Vec<f32>,
    history: Vec<usize>,
    budget: usize,
    sampler: Sampler,
    decoding: DecodingState,
    cancel: CancellationToken,
    timer: Option<GenerationTimer>,
}

impl LoraStream<'_> {
    fn finish(&mut self, stop: StopReason) {
        if let Some(timer) = self.timer.take() {
            timer.finish(stop);
        }
    }

    fn delta(&self) -> &LoraDelta {
        self.persona.delta()
    }
}

impl Iterator for LoraStream<'_> {
    type Item = persona_engine::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        // exhausted
        self.timer.as_ref()?;

        if self.cancel.is_cancelled() {
            self.finish(StopReason::Cancelled);
            return None;
        }
        if self.history.len() >= self.budget {
            self.finish(StopReason::TokenBudget);
            return None;
        }

        let base = self.base;
        let tokenizer = base.tokenizer();
        let mut logits = base.logits(&self.state, Some(self.delta()));
        if let Some(unk) = logits.get_mut(tokenizer.unk_id() as usize) {
            *unk = f32::NEG_INFINITY;
        }

        let token = match self.sampler.sample(&logits, &self.history) {
            Ok(token) => token as TokenId,
            Err(e) => {
                self.finish(StopReason::Fault);
                return Some(Err(EngineError::Inference(e.to_string())));
            }
        };
        if token == tokenizer.eos_id() {
            self.finish(StopReason::EndOfOutput);
            return None;
        }

        base.step(&mut self.state, token);
        self.history.push(token as usize);

        match tokenizer.decode_token(token, &mut self.decoding) {
            Ok(text) => {
                if let Some(timer) = self.timer.as_mut() {
                    timer.mark_fragment();
                }
                Some(Ok(text))
            }
            Err(e) => {
                self.finish(StopReason::Fault);
                Some(Err(EngineError::Tokenization(e.to_string())))
            }
        }
    }
}

impl Drop for LoraStream<'_> {
    fn drop(&mut self) {
        self.finish(StopReason::Cancelled);
    }
}
