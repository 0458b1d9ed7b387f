//! # persona-rag
//!
//! Optional context for persona prompts.
//!
//! The gateway only needs one thing from retrieval: given a persona and a
//! prompt, some text to append to the prompt, or nothing. That seam is
//! [`ContextProvider`]. [`JsonlIndex`] is a local provider over curated chat
//! transcripts; [`NoContext`] disables retrieval.

mod error;
mod index;

pub use error::{RagError, Result};
pub use index::{JsonlIndex, DEFAULT_MAX_DOCS};

/// Instruction placed in front of retrieved context.
pub const CONTEXT_PREAMBLE: &str = "Nutze zwingend die folgenden Fakten aus der Kurationsdatenbank. \
Wenn der Kontext Fragen beantwortet, zitiere ihn knapp und bleibe bei der Persona.";

/// A retrieved question/answer pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// File the pair came from.
    pub source: String,
    pub persona: String,
    pub question: String,
    pub answer: String,
    pub score: f32,
}

impl Chunk {
    /// Render as a citation block.
    pub fn block(&self) -> String {
        format!(
            "Quelle: {} (Persona: {})\nFrage: {}\nAntwort: {}",
            self.source, self.persona, self.question, self.answer
        )
    }
}

/// Core trait for retrieval.
///
/// Implementations must be cheap to call from a request task: they run before
/// the request waits for the engine.
pub trait ContextProvider: Send + Sync {
    /// Context text for `prompt` as answered by `persona`, if any applies.
    fn context_for(&self, persona: &str, prompt: &str) -> Option<String>;
}

/// Provider that never returns context.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContext;

impl ContextProvider for NoContext {
    fn context_for(&self, _persona: &str, _prompt: &str) -> Option<String> {
        None
    }
}

/// Join chunks into one context string, best first.
pub fn format_context(chunks: &[Chunk]) -> Option<String> {
    if chunks.is_empty() {
        return None;
    }
    Some(
        chunks
            .iter()
            .map(Chunk::block)
            .collect::<Vec<_>>()
            .join("\n\n"),
    )
}

/// Append `context` to `prompt` under [`CONTEXT_PREAMBLE`].
pub fn augment_prompt(prompt: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.trim().is_empty() => {
            format!("{}\n\n{CONTEXT_PREAMBLE}\n{}", prompt.trim(), context.trim())
        }
        _ => prompt.to_string(),
    }
}
