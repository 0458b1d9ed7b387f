//! Local retrieval over curated chat transcripts.
//!
//! The corpus is a directory of `*.jsonl` files, one per persona (the file
//! stem is the persona id). Each line is a chat sample
//! `{"messages": [{"role": "system" | "user" | "assistant", "content": ...}]}`;
//! the first user and assistant messages become one document. Lines without
//! both are skipped.
//!
//! Documents are ranked by TF-IDF cosine similarity over unigrams and bigrams
//! with German stop words removed. A persona's own documents are searched
//! when it has any, otherwise the whole corpus.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{RagError, Result};
use crate::{format_context, Chunk, ContextProvider};

pub const DEFAULT_MAX_DOCS: usize = 2000;

const STOP_WORDS: &[&str] = &[
    "der", "die", "das", "und", "oder", "ein", "eine", "ist", "sind", "den", "dem", "mit", "für",
    "auf", "im", "in", "zu", "vom", "am", "aus", "dass", "nicht", "wie", "was", "wer", "warum",
    "wieso", "weshalb", "auch", "nur", "wenn", "man",
];

#[derive(Debug, Deserialize)]
struct Sample {
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    role: String,
    content: serde_json::Value,
}

#[derive(Debug, Clone)]
struct Document {
    persona: String,
    question: String,
    answer: String,
    source: String,
}

/// Sparse, L2-normalised TF-IDF vector.
type Vector = HashMap<usize, f32>;

#[derive(Debug, Default)]
pub struct JsonlIndex {
    documents: Vec<Document>,
    vectors: Vec<Vector>,
    terms: HashMap<String, usize>,
    idf: Vec<f32>,
    by_persona: HashMap<String, Vec<usize>>,
    top_k: usize,
}

impl JsonlIndex {
    /// Load every `*.jsonl` file in `dir` (sorted by name), stopping after
    /// `max_docs` documents.
    pub fn load(dir: &Path, top_k: usize, max_docs: usize) -> Result<Self> {
        if !dir.is_dir() {
            return Err(RagError::MissingCorpus(dir.to_path_buf()));
        }
        let entries = std::fs::read_dir(dir).map_err(|source| RagError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "jsonl"))
            .collect();
        files.sort();

        let mut documents = Vec::new();
        for path in files {
            if documents.len() >= max_docs {
                break;
            }
            let persona = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            let raw = std::fs::read_to_string(&path).map_err(|source| RagError::Io {
                path: path.clone(),
                source,
            })?;
            let source = path.display().to_string();
            let before = documents.len();
            documents.extend(
                raw.lines()
                    .filter_map(|line| parse_line(line, &persona, &source))
                    .take(max_docs - before),
            );
            tracing::debug!(
                file = %source,
                persona = %persona,
                documents = documents.len() - before,
                "indexed transcript"
            );
        }

        let index = Self::build(documents, top_k);
        tracing::info!(
            corpus = %dir.display(),
            documents = index.len(),
            terms = index.terms.len(),
            "retrieval index ready"
        );
        Ok(index)
    }

    fn build(documents: Vec<Document>, top_k: usize) -> Self {
        let mut terms: HashMap<String, usize> = HashMap::new();
        let mut df: Vec<usize> = Vec::new();
        let mut counts: Vec<HashMap<usize, f32>> = Vec::with_capacity(documents.len());

        for doc in &documents {
            let mut tf: HashMap<usize, f32> = HashMap::new();
            for term in analyze(&doc.context()) {
                let next = terms.len();
                let id = *terms.entry(term).or_insert(next);
                if id == df.len() {
                    df.push(0);
                }
                *tf.entry(id).or_insert(0.0) += 1.0;
            }
            for &id in tf.keys() {
                df[id] += 1;
            }
            counts.push(tf);
        }

        // smoothed idf: ln((1 + n) / (1 + df)) + 1
        let n = documents.len() as f32;
        let idf: Vec<f32> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();

        let vectors = counts
            .into_iter()
            .map(|tf| normalize(tf.into_iter().map(|(id, c)| (id, c * idf[id])).collect()))
            .collect();

        let mut by_persona: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, doc) in documents.iter().enumerate() {
            by_persona.entry(doc.persona.clone()).or_default().push(idx);
        }

        Self {
            documents,
            vectors,
            terms,
            idf,
            by_persona,
            top_k,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Best matches for `prompt`, at most `limit`, all with a positive score.
    pub fn query(&self, persona: &str, prompt: &str, limit: usize) -> Vec<Chunk> {
        let prompt = prompt.trim();
        if prompt.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let mut tf: HashMap<usize, f32> = HashMap::new();
        for term in analyze(prompt) {
            if let Some(&id) = self.terms.get(&term) {
                *tf.entry(id).or_insert(0.0) += 1.0;
            }
        }
        let query = normalize(tf.into_iter().map(|(id, c)| (id, c * self.idf[id])).collect());
        if query.is_empty() {
            return Vec::new();
        }

        let all: Vec<usize>;
        let candidates = match self.by_persona.get(&persona.to_lowercase()) {
            Some(own) if !own.is_empty() => own.as_slice(),
            _ => {
                all = (0..self.documents.len()).collect();
                all.as_slice()
            }
        };

        let mut scored: Vec<(usize, f32)> = candidates
            .iter()
            .map(|&idx| (idx, dot(&query, &self.vectors[idx])))
            .collect();
        // stable sort keeps corpus order among equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(limit)
            .filter(|&(_, score)| score > 0.0)
            .map(|(idx, score)| {
                let doc = &self.documents[idx];
                Chunk {
                    source: doc.source.clone(),
                    persona: doc.persona.clone(),
                    question: doc.question.clone(),
                    answer: doc.answer.clone(),
                    score,
                }
            })
            .collect()
    }
}

impl ContextProvider for JsonlIndex {
    fn context_for(&self, persona: &str, prompt: &str) -> Option<String> {
        format_context(&self.query(persona, prompt, self.top_k))
    }
}

impl Document {
    fn context(&self) -> String {
        format!("Frage: {}\nAntwort: {}", self.question, self.answer)
    }
}

fn parse_line(line: &str, persona: &str, source: &str) -> Option<Document> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let sample: Sample = serde_json::from_str(line).ok()?;
    let first = |role: &str| {
        sample
            .messages
            .iter()
            .find(|m| m.role == role)
            .and_then(|m| m.content.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let question = first("user")?;
    let answer = first("assistant")?;
    Some(Document {
        persona: persona.to_string(),
        question: question.to_string(),
        answer: answer.to_string(),
        source: source.to_string(),
    })
}

/// Lowercased words of two or more alphanumeric characters, stop words
/// removed, followed by the bigrams of the remaining words.
fn analyze(text: &str) -> Vec<String> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect();
    let bigrams: Vec<String> = words.windows(2).map(|w| format!("{} {}", w[0], w[1])).collect();
    words.into_iter().chain(bigrams).collect()
}

fn normalize(mut v: Vector) -> Vector {
    let norm = v.values().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.values_mut() {
            *x /= norm;
        }
    }
    v
}

fn dot(a: &Vector, b: &Vector) -> f32 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter_map(|(id, x)| large.get(id).map(|y| x * y))
        .sum()
}
