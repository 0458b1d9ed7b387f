//! Per-request generation state.

use std::fmt;

use persona_engine::{PersonaHandle, SamplingParams};
use uuid::Uuid;

use crate::config::GenerationSection;
use crate::error::ServerError;

/// Lifecycle of one streaming request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Gating,
    Activating,
    Streaming,
    Finishing,
    Closed,
}

impl SessionState {
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Gating)
                | (Gating, Activating)
                | (Gating, Closed)
                | (Activating, Streaming)
                | (Activating, Finishing)
                | (Streaming, Streaming)
                | (Streaming, Finishing)
                | (Finishing, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal session transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: SessionState,
    pub to: SessionState,
}

/// A validated completion request, before any engine access.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub persona: String,
    pub prompt: String,
    pub max_output_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub nucleus_p: Option<f32>,
    pub repetition_penalty: Option<f32>,
    pub seed: Option<u64>,
}

impl GenerationRequest {
    pub fn new(persona: impl Into<String>, prompt: &str) -> Result<Self, ServerError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ServerError::InvalidRequest(
                "prompt must not be empty".into(),
            ));
        }
        Ok(Self {
            persona: persona.into(),
            prompt: prompt.to_string(),
            max_output_tokens: None,
            temperature: None,
            nucleus_p: None,
            repetition_penalty: None,
            seed: None,
        })
    }

    /// Overrides on top of the configured defaults. The output length is
    /// capped at `output_token_limit`; everything else must be in range.
    pub fn sampling_params(&self, generation: &GenerationSection) -> Result<SamplingParams, ServerError> {
        let mut params = generation.defaults();
        if let Some(n) = self.max_output_tokens {
            params.max_output_tokens = n.min(generation.output_token_limit);
        }
        if let Some(t) = self.temperature {
            params.temperature = t;
        }
        if let Some(p) = self.nucleus_p {
            params.nucleus_p = p;
        }
        if let Some(r) = self.repetition_penalty {
            params.repetition_penalty = r;
        }
        params.seed = self.seed;
        params.validate()?;
        Ok(params)
    }
}

/// Everything one generation needs, owned by whichever side currently
/// drives it: the encoder while gating, the producer afterwards.
#[derive(Debug)]
pub struct GenerationSession {
    id: Uuid,
    persona: PersonaHandle,
    prompt: String,
    params: SamplingParams,
    state: SessionState,
    history: Vec<SessionState>,
    visible: VisibleText,
    span: tracing::Span,
}

impl GenerationSession {
    pub fn new(
        persona: PersonaHandle,
        prompt: String,
        params: SamplingParams,
        strip_reasoning: bool,
    ) -> Self {
        let id = Uuid::new_v4();
        let span = tracing::info_span!("session", %id, persona = %persona.id());
        Self {
            id,
            persona,
            prompt,
            params,
            state: SessionState::Idle,
            history: vec![SessionState::Idle],
            visible: VisibleText::new(strip_reasoning),
            span,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn persona(&self) -> &PersonaHandle {
        &self.persona
    }

    /// Engine input: user prompt plus any retrieved context.
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn params(&self) -> &SamplingParams {
        &self.params
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state entered so far, starting with `Idle`.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn visible_mut(&mut self) -> &mut VisibleText {
        &mut self.visible
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), IllegalTransition> {
        if !self.state.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(parent: &self.span, from = %self.state, to = %next, "session transition");
        self.state = next;
        self.history.push(next);
        Ok(())
    }
}

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// Incremental view of the generated text as the client should see it.
///
/// Fragments go in, newly visible suffixes come out. With reasoning
/// stripping on, `<think>...</think>` blocks are removed even when a tag is
/// split across fragments; a trailing partial tag is held back until the
/// next fragment decides it. Leading whitespace of the answer is dropped.
#[derive(Debug, Clone)]
pub struct VisibleText {
    strip_reasoning: bool,
    pending: String,
    in_reasoning: bool,
    started: bool,
}

impl VisibleText {
    pub fn new(strip_reasoning: bool) -> Self {
        Self {
            strip_reasoning,
            pending: String::new(),
            in_reasoning: false,
            started: false,
        }
    }

    /// Feed one fragment; returns the text that became visible, if any.
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        if !self.strip_reasoning {
            return self.emit(fragment.to_string());
        }
        self.pending.push_str(fragment);

        let mut out = String::new();
        loop {
            if self.in_reasoning {
                match self.pending.find(THINK_CLOSE) {
                    Some(i) => {
                        self.pending.drain(..i + THINK_CLOSE.len());
                        self.in_reasoning = false;
                    }
                    None => {
                        let keep = partial_suffix(&self.pending, THINK_CLOSE);
                        self.pending.drain(..self.pending.len() - keep);
                        break;
                    }
                }
            } else if let Some(i) = self.pending.find(THINK_OPEN) {
                out.push_str(&self.pending[..i]);
                self.pending.drain(..i + THINK_OPEN.len());
                self.in_reasoning = true;
            } else if let Some(i) = self.pending.find(THINK_CLOSE) {
                // stray closing tag, drop the tag itself
                out.push_str(&self.pending[..i]);
                self.pending.drain(..i + THINK_CLOSE.len());
            } else {
                let keep = partial_suffix(&self.pending, THINK_OPEN)
                    .max(partial_suffix(&self.pending, THINK_CLOSE));
                let cut = self.pending.len() - keep;
                out.push_str(&self.pending[..cut]);
                self.pending.drain(..cut);
                break;
            }
        }
        self.emit(out)
    }

    /// Flush held-back text at end of output. An unterminated reasoning
    /// block is discarded.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        if self.in_reasoning {
            return None;
        }
        self.emit(rest)
    }

    fn emit(&mut self, text: String) -> Option<String> {
        let text = if self.started {
            text
        } else {
            let trimmed = text.trim_start();
            if trimmed.is_empty() {
                return None;
            }
            self.started = true;
            trimmed.to_string()
        };
        (!text.is_empty()).then_some(text)
    }
}

/// Length of the longest proper prefix of `tag` that `text` ends with.
fn partial_suffix(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&k| text.ends_with(&tag[..k]))
        .unwrap_or(0)
}
