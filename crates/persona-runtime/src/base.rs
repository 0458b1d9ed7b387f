//! Shared base model for [`LoraEngine`](crate::LoraEngine).
//!
//! A word-level recurrent model small enough to run on a CPU thread:
//!
//! ```text
//! h_t    = decay * h_{t-1} + embed[token_t]
//! x_t    = RMSNorm(h_t)
//! logits = lm_head · x_t  (+ persona delta)
//! ```
//!
//! On disk a base model is a directory with `config.json`,
//! `model.safetensors` (`embed_tokens.weight`, `lm_head.weight`, both
//! `[vocab_size, hidden_size]`) and `vocab.json`.

use std::path::Path;

use persona_engine::LoraDelta;
use persona_gateway::weights::{write_file, SafetensorsFile};
use persona_sampling::SeededRng;
use persona_tokenizer::{TokenId, Tokenizer, WordTokenizer};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const VOCAB_FILE: &str = "vocab.json";

pub const EMBED_TOKENS: &str = "embed_tokens.weight";
pub const LM_HEAD: &str = "lm_head.weight";

const RMS_EPS: f32 = 1e-5;

/// Contents of `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseConfig {
    pub vocab_size: usize,
    pub hidden_size: usize,

    /// State carried over per step, in `[0, 1)`.
    #[serde(default = "default_decay")]
    pub decay: f32,
}

fn default_decay() -> f32 {
    0.5
}

impl BaseConfig {
    fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 || self.hidden_size == 0 {
            return Err(RuntimeError::Config(
                "vocab_size and hidden_size must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.decay) {
            return Err(RuntimeError::Config(format!(
                "decay must be in [0, 1) (got {})",
                self.decay
            )));
        }
        Ok(())
    }
}

/// Loaded base model weights and vocabulary.
#[derive(Debug, Clone)]
pub struct BaseModel {
    config: BaseConfig,
    tokenizer: WordTokenizer,
    embed: Vec<f32>,
    lm_head: Vec<f32>,
}

impl BaseModel {
    /// Assemble a model from in-memory parts, checking every shape.
    pub fn from_parts(
        config: BaseConfig,
        tokenizer: WordTokenizer,
        embed: Vec<f32>,
        lm_head: Vec<f32>,
    ) -> Result<Self> {
        config.validate()?;
        if tokenizer.vocab_size() != config.vocab_size {
            return Err(RuntimeError::Config(format!(
                "vocab.json has {} entries, config says {}",
                tokenizer.vocab_size(),
                config.vocab_size
            )));
        }
        let expected = config.vocab_size * config.hidden_size;
        for (name, len) in [(EMBED_TOKENS, embed.len()), (LM_HEAD, lm_head.len())] {
            if len != expected {
                return Err(RuntimeError::Config(format!(
                    "{name} has {len} values, expected {expected}"
                )));
            }
        }
        Ok(Self {
            config,
            tokenizer,
            embed,
            lm_head,
        })
    }

    /// Random weights drawn from a seeded RNG, uniform in `[-scale, scale)`.
    pub fn seeded(
        tokenizer: WordTokenizer,
        hidden_size: usize,
        decay: f32,
        scale: f32,
        seed: u64,
    ) -> Result<Self> {
        let config = BaseConfig {
            vocab_size: tokenizer.vocab_size(),
            hidden_size,
            decay,
        };
        let mut rng = SeededRng::new(seed);
        let mut draw = |n: usize| -> Vec<f32> {
            (0..n).map(|_| (rng.next_f32() * 2.0 - 1.0) * scale).collect()
        };
        let n = config.vocab_size * hidden_size;
        let embed = draw(n);
        let lm_head = draw(n);
        Self::from_parts(config, tokenizer, embed, lm_head)
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        let raw = std::fs::read_to_string(&config_path).map_err(|source| RuntimeError::Io {
            path: config_path.clone(),
            source,
        })?;
        let config: BaseConfig = serde_json::from_str(&raw)
            .map_err(|e| RuntimeError::Config(format!("{}: {e}", config_path.display())))?;
        config.validate()?;

        let tokenizer = WordTokenizer::load(&dir.join(VOCAB_FILE))?;

        let shape = [config.vocab_size, config.hidden_size];
        let weights = SafetensorsFile::open(&dir.join(WEIGHTS_FILE))?;
        let embed = weights.read_f32_shaped(EMBED_TOKENS, &shape)?;
        let lm_head = weights.read_f32_shaped(LM_HEAD, &shape)?;

        tracing::info!(
            model = %dir.display(),
            vocab_size = config.vocab_size,
            hidden_size = config.hidden_size,
            "loaded base model"
        );
        Self::from_parts(config, tokenizer, embed, lm_head)
    }

    /// Write the model in the layout [`load`](Self::load) reads.
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|source| RuntimeError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let config_path = dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(&self.config)
            .map_err(|e| RuntimeError::Config(e.to_string()))?;
        std::fs::write(&config_path, json).map_err(|source| RuntimeError::Io {
            path: config_path,
            source,
        })?;

        self.tokenizer.save(&dir.join(VOCAB_FILE))?;

        let shape = [self.config.vocab_size, self.config.hidden_size];
        write_file(
            &dir.join(WEIGHTS_FILE),
            &[
                (EMBED_TOKENS, &shape[..], &self.embed[..]),
                (LM_HEAD, &shape[..], &self.lm_head[..]),
            ],
            &[("format", "pt")],
        )?;
        Ok(())
    }

    pub fn config(&self) -> &BaseConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &WordTokenizer {
        &self.tokenizer
    }

    pub fn hidden_size(&self) -> usize {
        self.config.hidden_size
    }

    pub fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    /// Fresh recurrent state.
    pub fn initial_state(&self) -> Vec<f32> {
        vec![0.0; self.config.hidden_size]
    }

    /// Fold one token into the recurrent state.
    pub fn step(&self, state: &mut [f32], token: TokenId) {
        let d = self.config.hidden_size;
        let start = token as usize * d;
        let Some(row) = self.embed.get(start..start + d) else {
            return;
        };
        for (h, e) in state.iter_mut().zip(row) {
            *h = self.config.decay * *h + e;
        }
    }

    /// Next-token logits for `state`, with an optional persona delta on the
    /// output projection.
    pub fn logits(&self, state: &[f32], delta: Option<&LoraDelta>) -> Vec<f32> {
        let x = rms_norm(state);
        let d = self.config.hidden_size;
        let mut logits: Vec<f32> = self
            .lm_head
            .chunks_exact(d)
            .map(|row| row.iter().zip(&x).map(|(w, v)| w * v).sum())
            .collect();
        if let Some(delta) = delta {
            delta.apply(&x, &mut logits);
        }
        logits
    }
}

fn rms_norm(x: &[f32]) -> Vec<f32> {
    let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / x.len().max(1) as f32;
    let inv_rms = 1.0 / (mean_sq + RMS_EPS).sqrt();
    x.iter().map(|v| v * inv_rms).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use persona_tokenizer::{EOS_TOKEN, UNK_TOKEN};

    fn tokenizer() -> WordTokenizer {
        WordTokenizer::from_words(vec![EOS_TOKEN.into(), UNK_TOKEN.into(), "ja".into()]).unwrap()
    }

    #[test]
    fn rms_norm_has_unit_rms() {
        let x = rms_norm(&[3.0, -4.0]);
        let rms = (x.iter().map(|v| v * v).sum::<f32>() / 2.0).sqrt();
        assert!((rms - 1.0).abs() < 1e-3);
    }

    #[test]
    fn step_decays_previous_state() {
        let config = BaseConfig {
            vocab_size: 3,
            hidden_size: 2,
            decay: 0.5,
        };
        let embed = vec![0.0, 0.0, 0.0, 0.0, 1.0, 2.0];
        let model = BaseModel::from_parts(config, tokenizer(), embed, vec![0.0; 6]).unwrap();
        let mut h = model.initial_state();
        model.step(&mut h, 2);
        model.step(&mut h, 2);
        assert_eq!(h, vec![1.5, 3.0]);
    }

    #[test]
    fn rejects_wrong_sizes() {
        let config = BaseConfig {
            vocab_size: 3,
            hidden_size: 2,
            decay: 0.5,
        };
        assert!(BaseModel::from_parts(config.clone(), tokenizer(), vec![0.0; 5], vec![0.0; 6]).is_err());
        let bad_decay = BaseConfig { decay: 1.0, ..config };
        assert!(BaseModel::from_parts(bad_decay, tokenizer(), vec![0.0; 6], vec![0.0; 6]).is_err());
    }
}
