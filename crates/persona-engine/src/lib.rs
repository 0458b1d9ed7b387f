//! # persona-engine
//!
//! The "narrow waist" of the persona gateway. Defines the [`GenerationEngine`]
//! trait and the types every other crate agrees on: personas and their LoRA
//! deltas, sampling parameters, fragments and the engine error type.
//!
//! ## Design Notes
//!
//! ### Exclusive access
//! Unlike a stateless inference backend, a `GenerationEngine` carries mutable
//! state: the currently active persona. Both [`GenerationEngine::activate`] and
//! [`GenerationEngine::generate`] take `&mut self`, so the only way to reach
//! them from several request tasks is through an owner that hands out
//! exclusive access (the gateway's concurrency gate). Engines do not lock
//! internally.
//!
//! ### Cancellation
//! Generation is cancelled cooperatively. `generate` receives a
//! [`CancellationToken`] and implementations must poll it before each
//! fragment's worth of work, so at most one fragment is computed after the
//! token trips.

mod persona;

pub use persona::{LoraDelta, Persona, PersonaHandle};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Top-level error type for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("activation of persona '{persona}' failed: {reason}")]
    Activation { persona: String, reason: String },
    #[error("no persona is active")]
    NoActivePersona,
    #[error("invalid sampling parameters: {0}")]
    InvalidParams(String),
    #[error("tokenization failed: {0}")]
    Tokenization(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Sampling parameters for a single generation.
///
/// Defaults match the serving defaults of the persona models
/// (160 new tokens, temperature 0.7, nucleus 0.9, repetition penalty 1.05).
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingParams {
    /// Maximum number of tokens to generate.
    pub max_output_tokens: usize,
    /// Softmax temperature, must be > 0.
    pub temperature: f32,
    /// Nucleus (top-p) threshold in `(0, 1]`.
    pub nucleus_p: f32,
    /// Repetition penalty, must be > 0 (1.0 disables it).
    pub repetition_penalty: f32,
    /// RNG seed; `None` lets the engine pick one per generation.
    pub seed: Option<u64>,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_output_tokens: 160,
            temperature: 0.7,
            nucleus_p: 0.9,
            repetition_penalty: 1.05,
            seed: None,
        }
    }
}

impl SamplingParams {
    /// Check that every parameter is inside its valid range.
    pub fn validate(&self) -> Result<()> {
        if self.max_output_tokens == 0 {
            return Err(EngineError::InvalidParams(
                "max output tokens must be at least 1".into(),
            ));
        }
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "temperature must be > 0 (got {})",
                self.temperature
            )));
        }
        if !self.nucleus_p.is_finite() || self.nucleus_p <= 0.0 || self.nucleus_p > 1.0 {
            return Err(EngineError::InvalidParams(format!(
                "nucleus p must be in (0, 1] (got {})",
                self.nucleus_p
            )));
        }
        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(EngineError::InvalidParams(format!(
                "repetition penalty must be > 0 (got {})",
                self.repetition_penalty
            )));
        }
        Ok(())
    }
}

/// Lazy, single-pass sequence of generated text fragments.
///
/// The sequence is finite: it ends at end-of-output, when the token budget is
/// exhausted, or once the cancellation token has tripped. An `Err` item is a
/// fault; callers stop consuming after it.
pub type Fragments<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// The core engine trait.
///
/// One instance backs the whole gateway. Callers hold exclusive access for
/// the full `activate` + `generate` sequence.
pub trait GenerationEngine: Send + 'static {
    /// Reconfigure the engine to answer as `persona`.
    ///
    /// Activation is all-or-nothing: on error the engine must be left with no
    /// active persona rather than a partially applied one.
    fn activate(&mut self, persona: &PersonaHandle) -> Result<()>;

    /// Drop the active persona. Used to reset the engine after a fault.
    fn deactivate(&mut self);

    /// The currently active persona, if any.
    fn active_persona(&self) -> Option<&PersonaHandle>;

    /// Generate fragments for `prompt` as the active persona.
    fn generate(
        &mut self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancellationToken,
    ) -> Result<Fragments<'_>>;
}

impl<E: GenerationEngine + ?Sized> GenerationEngine for Box<E> {
    fn activate(&mut self, persona: &PersonaHandle) -> Result<()> {
        (**self).activate(persona)
    }

    fn deactivate(&mut self) {
        (**self).deactivate()
    }

    fn active_persona(&self) -> Option<&PersonaHandle> {
        (**self).active_persona()
    }

    fn generate(
        &mut self,
        prompt: &str,
        params: &SamplingParams,
        cancel: CancellationToken,
    ) -> Result<Fragments<'_>> {
        (**self).generate(prompt, params, cancel)
    }
}
