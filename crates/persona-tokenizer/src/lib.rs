//! # persona-tokenizer
//!
//! Deterministic word-level tokenization for the persona runtime.
//!
//! This crate provides:
//! - A `Tokenizer` trait for pluggable tokenization backends
//! - `WordTokenizer`, a fixed vocabulary loaded from `vocab.json`
//! - Streaming decoding that reproduces the spacing of a full decode

use std::collections::HashMap;
use std::path::Path;

pub type TokenId = u32;

/// End-of-output marker. Every vocabulary must contain it.
pub const EOS_TOKEN: &str = "</s>";
/// Replacement for out-of-vocabulary words. Every vocabulary must contain it.
pub const UNK_TOKEN: &str = "<unk>";

/// Punctuation split off words and attached to the previous token on decode.
const CLOSING: &[char] = &[',', '.', ';', ':', '!', '?', ')', '»'];
/// Punctuation split off words and attached to the next token on decode.
const OPENING: &[char] = &['(', '«'];

/// Error type for tokenization operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizerError {
    #[error("invalid token id: {0}")]
    InvalidToken(TokenId),
    #[error("vocabulary error: {0}")]
    Vocabulary(String),
    #[error("failed to read vocabulary {path}: {reason}")]
    Io { path: String, reason: String },
}

pub type TokenizerResult<T> = std::result::Result<T, TokenizerError>;

/// Core tokenizer trait. Implementations can be swapped without changing app code.
pub trait Tokenizer: Send + Sync {
    /// Encode text into a sequence of token ids.
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>>;

    /// Decode a complete sequence of tokens into text.
    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String>;

    /// Decode a single token, returning exactly the text it adds to `state`.
    ///
    /// Concatenating the outputs for a sequence equals `decode` of that
    /// sequence.
    fn decode_token(&self, token: TokenId, state: &mut DecodingState) -> TokenizerResult<String>;

    /// Get vocabulary size.
    fn vocab_size(&self) -> usize;
}

/// Streaming decoding state.
#[derive(Debug, Clone, Default)]
pub struct DecodingState {
    buffer: String,
    emitted_any: bool,
    glue_next: bool,
}

impl DecodingState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.emitted_any = false;
        self.glue_next = false;
    }
}

/// Fixed word-level vocabulary.
///
/// - Splits on whitespace, then separates leading/trailing punctuation
/// - Falls back to the lowercase form, then to `<unk>`
/// - Special tokens (`</s>`, `<unk>`) decode to nothing
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    words: Vec<String>,
    ids: HashMap<String, TokenId>,
    eos: TokenId,
    unk: TokenId,
}

impl WordTokenizer {
    /// Build from a word list; the index of each word is its id.
    pub fn from_words(words: Vec<String>) -> TokenizerResult<Self> {
        let mut ids = HashMap::with_capacity(words.len());
        for (idx, word) in words.iter().enumerate() {
            if word.is_empty() || word.chars().any(char::is_whitespace) {
                return Err(TokenizerError::Vocabulary(format!(
                    "entry {idx} ({word:?}) is empty or contains whitespace"
                )));
            }
            let id = TokenId::try_from(idx)
                .map_err(|_| TokenizerError::Vocabulary("vocabulary too large".into()))?;
            if ids.insert(word.clone(), id).is_some() {
                return Err(TokenizerError::Vocabulary(format!(
                    "duplicate entry {word:?}"
                )));
            }
        }

        let special = |name: &str| {
            ids.get(name).copied().ok_or_else(|| {
                TokenizerError::Vocabulary(format!("missing special token {name}"))
            })
        };
        let eos = special(EOS_TOKEN)?;
        let unk = special(UNK_TOKEN)?;

        Ok(Self {
            words,
            ids,
            eos,
            unk,
        })
    }

    /// Load a `vocab.json` holding a JSON array of strings.
    pub fn load(path: &Path) -> TokenizerResult<Self> {
        let io_err = |reason: String| TokenizerError::Io {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| io_err(e.to_string()))?;
        let words: Vec<String> = serde_json::from_str(&raw).map_err(|e| io_err(e.to_string()))?;
        Self::from_words(words)
    }

    /// Write the vocabulary in the format [`load`](Self::load) reads.
    pub fn save(&self, path: &Path) -> TokenizerResult<()> {
        let io_err = |reason: String| TokenizerError::Io {
            path: path.display().to_string(),
            reason,
        };
        let json = serde_json::to_string_pretty(&self.words).map_err(|e| io_err(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| io_err(e.to_string()))
    }

    pub fn eos_id(&self) -> TokenId {
        self.eos
    }

    pub fn unk_id(&self) -> TokenId {
        self.unk
    }

    pub fn is_special(&self, id: TokenId) -> bool {
        id == self.eos || id == self.unk
    }

    /// Id of an exact vocabulary entry.
    pub fn id_of(&self, word: &str) -> Option<TokenId> {
        self.ids.get(word).copied()
    }

    pub fn word(&self, id: TokenId) -> TokenizerResult<&str> {
        self.words
            .get(id as usize)
            .map(String::as_str)
            .ok_or(TokenizerError::InvalidToken(id))
    }

    fn lookup(&self, piece: &str) -> TokenId {
        self.ids
            .get(piece)
            .or_else(|| self.ids.get(&piece.to_lowercase()))
            .copied()
            .unwrap_or(self.unk)
    }
}

/// Split one whitespace-delimited word into leading punctuation, core and
/// trailing punctuation pieces.
fn pieces(word: &str) -> Vec<&str> {
    let is_punct = |c: char| CLOSING.contains(&c) || OPENING.contains(&c);

    let mut out = Vec::new();
    let mut rest = word;
    while let Some(c) = rest.chars().next().filter(|&c| is_punct(c)) {
        out.push(&rest[..c.len_utf8()]);
        rest = &rest[c.len_utf8()..];
    }
    let mut tail = Vec::new();
    while let Some(c) = rest.chars().next_back().filter(|&c| is_punct(c)) {
        let at = rest.len() - c.len_utf8();
        tail.push(&rest[at..]);
        rest = &rest[..at];
    }
    if !rest.is_empty() {
        out.push(rest);
    }
    out.extend(tail.into_iter().rev());
    out
}

fn attaches_left(word: &str) -> bool {
    let mut chars = word.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if CLOSING.contains(&c))
}

fn attaches_right(word: &str) -> bool {
    let mut chars = word.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if OPENING.contains(&c))
}

impl Tokenizer for WordTokenizer {
    fn encode(&self, text: &str) -> TokenizerResult<Vec<TokenId>> {
        Ok(text
            .split_whitespace()
            .flat_map(pieces)
            .map(|piece| self.lookup(piece))
            .collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> TokenizerResult<String> {
        let mut state = DecodingState::new();
        for &id in tokens {
            self.decode_token(id, &mut state)?;
        }
        Ok(state.buffer)
    }

    fn decode_token(&self, token: TokenId, state: &mut DecodingState) -> TokenizerResult<String> {
        let word = self.word(token)?;
        if self.is_special(token) {
            return Ok(String::new());
        }

        let glue = !state.emitted_any || state.glue_next || attaches_left(word);
        let emitted = if glue {
            word.to_string()
        } else {
            format!(" {word}")
        };
        state.buffer.push_str(&emitted);
        state.emitted_any = true;
        state.glue_next = attaches_right(word);
        Ok(emitted)
    }

    fn vocab_size(&self) -> usize {
        self.words.len()
    }
}
