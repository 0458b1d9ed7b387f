//! # persona-sampling
//!
//! Token sampling for the persona runtime.
//!
//! Supports:
//! - Temperature scaling
//! - Nucleus (top-p) filtering
//! - Repetition penalty over the generated history
//! - Masked vocabulary entries (`f32::NEG_INFINITY` logits are never chosen)
//! - Deterministic seeded RNG for reproducible generation

/// Sampling error type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SamplingError {
    #[error("invalid logits array")]
    InvalidLogits,
    #[error("temperature must be > 0")]
    InvalidTemperature,
    #[error("no valid tokens after filtering")]
    NoValidTokens,
}

pub type SamplingResult<T> = std::result::Result<T, SamplingError>;

/// Deterministic RNG for reproducible sampling.
///
/// Uses a simple xorshift64 algorithm for fast, reproducible random numbers.
#[derive(Debug, Clone)]
pub struct SeededRng {
    state: u64,
}

impl SeededRng {
    pub fn new(seed: u64) -> Self {
        // xorshift never leaves the zero state
        Self {
            state: if seed == 0 { 1 } else { seed },
        }
    }

    /// Generate next random float in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Sampling configuration plus its RNG state.
#[derive(Debug, Clone)]
pub struct Sampler {
    /// Softmax temperature. > 1.0 flattens, < 1.0 sharpens.
    pub temperature: f32,

    /// Keep the smallest set of tokens whose cumulative probability reaches `p`.
    pub nucleus_p: Option<f32>,

    /// Divide positive (multiply negative) logits of already generated tokens.
    pub repetition_penalty: Option<f32>,

    rng: SeededRng,
}

impl Sampler {
    /// Plain softmax sampling at temperature 1.0 with seed 42.
    pub fn new() -> Self {
        Self {
            temperature: 1.0,
            nucleus_p: None,
            repetition_penalty: None,
            rng: SeededRng::new(42),
        }
    }

    pub fn with_temperature(mut self, temp: f32) -> Self {
        self.temperature = temp;
        self
    }

    /// `p >= 1.0` disables the filter.
    pub fn with_nucleus_p(mut self, p: f32) -> Self {
        self.nucleus_p = (p < 1.0).then_some(p);
        self
    }

    /// A penalty of exactly 1.0 disables the filter.
    pub fn with_repetition_penalty(mut self, penalty: f32) -> Self {
        self.repetition_penalty = ((penalty - 1.0).abs() > f32::EPSILON).then_some(penalty);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SeededRng::new(seed);
        self
    }

    /// Sample a token index from `logits`, penalising ids in `history`.
    pub fn sample(&mut self, logits: &[f32], history: &[usize]) -> SamplingResult<usize> {
        if logits.is_empty() || logits.iter().any(|l| l.is_nan()) {
            return Err(SamplingError::InvalidLogits);
        }
        if self.temperature.is_nan() || self.temperature <= 0.0 {
            return Err(SamplingError::InvalidTemperature);
        }

        let mut work = logits.to_vec();

        if let Some(penalty) = self.repetition_penalty {
            Self::apply_repetition_penalty(&mut work, history, penalty);
        }

        if (self.temperature - 1.0).abs() > 1e-6 {
            for logit in &mut work {
                *logit /= self.temperature;
            }
        }

        if !work.iter().any(|l| l.is_finite()) {
            return Err(SamplingError::NoValidTokens);
        }

        let probs = Self::softmax(&work);

        if self.temperature < 1e-3 {
            return Ok(Self::argmax(&probs));
        }

        let probs = match self.nucleus_p {
            Some(p) => Self::apply_nucleus(&probs, p),
            None => probs,
        };

        self.sample_from_distribution(&probs)
    }

    /// Each distinct id in `history` is penalised once.
    fn apply_repetition_penalty(logits: &mut [f32], history: &[usize], penalty: f32) {
        let mut seen = vec![false; logits.len()];
        for &id in history {
            if id >= logits.len() || seen[id] {
                continue;
            }
            seen[id] = true;
            if logits[id] > 0.0 {
                logits[id] /= penalty;
            } else {
                logits[id] *= penalty;
            }
        }
    }

    fn apply_nucleus(probs: &[f32], p: f32) -> Vec<f32> {
        let mut indexed: Vec<(usize, f32)> = probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let mut cumsum = 0.0;
        let mut cutoff_idx = 0;
        for (idx, (_, prob)) in indexed.iter().enumerate() {
            cumsum += prob;
            cutoff_idx = idx;
            if cumsum >= p {
                break;
            }
        }

        let cutoff_prob = indexed[cutoff_idx].1;
        let mut result: Vec<f32> = probs
            .iter()
            .map(|&pr| if pr >= cutoff_prob { pr } else { 0.0 })
            .collect();

        let sum: f32 = result.iter().sum();
        if sum > 0.0 {
            for pr in &mut result {
                *pr /= sum;
            }
        }
        result
    }

    fn softmax(logits: &[f32]) -> Vec<f32> {
        let max_logit = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let exps: Vec<f32> = logits.iter().map(|&l| (l - max_logit).exp()).collect();
        let sum: f32 = exps.iter().sum();
        exps.iter().map(|&e| e / sum).collect()
    }

    fn argmax(probs: &[f32]) -> usize {
        probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    fn sample_from_distribution(&mut self, probs: &[f32]) -> SamplingResult<usize> {
        let r = self.rng.next_f32();
        let mut cumsum = 0.0;
        for (i, &prob) in probs.iter().enumerate() {
            cumsum += prob;
            if prob > 0.0 && r < cumsum {
                return Ok(i);
            }
        }

        // rounding left r above the final cumulative sum
        probs
            .iter()
            .rposition(|&prob| prob > 0.0)
            .ok_or(SamplingError::NoValidTokens)
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_rng_reproducible() {
        let mut rng1 = SeededRng::new(42);
        let mut rng2 = SeededRng::new(42);
        for _ in 0..100 {
            let v1 = rng1.next_f32();
            assert_eq!(v1, rng2.next_f32());
            assert!((0.0..1.0).contains(&v1));
        }
    }

    #[test]
    fn zero_seed_still_advances() {
        let mut rng = SeededRng::new(0);
        let first = rng.next_f32();
        assert_ne!(first, rng.next_f32());
    }

    #[test]
    fn softmax_ignores_masked_entries() {
        let probs = Sampler::softmax(&[1.0, f32::NEG_INFINITY, 1.0]);
        assert_eq!(probs[1], 0.0);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn nucleus_filtering() {
        let probs = vec![0.5, 0.3, 0.15, 0.05];
        let filtered = Sampler::apply_nucleus(&probs, 0.8);
        assert!(filtered[0] > 0.0);
        assert!(filtered[1] > 0.0);
        assert_eq!(filtered[2], 0.0);
        assert_eq!(filtered[3], 0.0);
        assert!((filtered.iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn repetition_penalty_applies_once_per_token() {
        let mut logits = vec![4.0, -2.0, 1.0];
        Sampler::apply_repetition_penalty(&mut logits, &[0, 0, 1, 7], 2.0);
        assert_eq!(logits, vec![2.0, -4.0, 1.0]);
    }

    #[test]
    fn unit_penalty_and_full_nucleus_are_disabled() {
        let sampler = Sampler::new()
            .with_repetition_penalty(1.0)
            .with_nucleus_p(1.0);
        assert!(sampler.repetition_penalty.is_none());
        assert!(sampler.nucleus_p.is_none());
    }
}
