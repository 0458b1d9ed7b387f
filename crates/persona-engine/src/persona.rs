//! Personas and their low-rank weight deltas.

use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Shared, immutable handle to a loaded persona.
pub type PersonaHandle = Arc<Persona>;

/// Low-rank (LoRA) update to an output projection of shape `[d_out, d_in]`.
///
/// The delta is `scale * B · A` with `A: [rank, d_in]`, `B: [d_out, rank]`
/// and `scale = alpha / rank`. Both factors are stored row-major.
#[derive(Debug, Clone)]
pub struct LoraDelta {
    rank: usize,
    alpha: f32,
    d_in: usize,
    d_out: usize,
    a: Vec<f32>,
    b: Vec<f32>,
}

impl LoraDelta {
    /// Build a delta from its factors. Returns `None` when the factor lengths
    /// do not match the declared dimensions or the rank is zero.
    pub fn new(
        rank: usize,
        alpha: f32,
        d_in: usize,
        d_out: usize,
        a: Vec<f32>,
        b: Vec<f32>,
    ) -> Option<Self> {
        if rank == 0 || a.len() != rank * d_in || b.len() != d_out * rank {
            return None;
        }
        Some(Self {
            rank,
            alpha,
            d_in,
            d_out,
            a,
            b,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Input dimension (columns of `A`).
    pub fn d_in(&self) -> usize {
        self.d_in
    }

    /// Output dimension (rows of `B`).
    pub fn d_out(&self) -> usize {
        self.d_out
    }

    /// `alpha / rank`.
    pub fn scale(&self) -> f32 {
        self.alpha / self.rank as f32
    }

    /// The `A` factor, `[rank, d_in]`.
    pub fn a(&self) -> &[f32] {
        &self.a
    }

    /// The `B` factor, `[d_out, rank]`.
    pub fn b(&self) -> &[f32] {
        &self.b
    }

    /// Accumulate `scale * B · (A · x)` into `out`.
    ///
    /// `x` must have length `d_in` and `out` length `d_out`; shorter slices are
    /// left untouched past their end.
    pub fn apply(&self, x: &[f32], out: &mut [f32]) {
        let mut projected = vec![0.0f32; self.rank];
        for (r, slot) in projected.iter_mut().enumerate() {
            let row = &self.a[r * self.d_in..(r + 1) * self.d_in];
            *slot = row.iter().zip(x).map(|(w, v)| w * v).sum();
        }
        let scale = self.scale();
        for (o, value) in out.iter_mut().enumerate().take(self.d_out) {
            let row = &self.b[o * self.rank..(o + 1) * self.rank];
            let delta: f32 = row.iter().zip(&projected).map(|(w, p)| w * p).sum();
            *value += scale * delta;
        }
    }
}

/// A named configuration of the shared engine: instruction text plus delta.
#[derive(Debug)]
pub struct Persona {
    id: String,
    instruction: String,
    delta: LoraDelta,
    source: PathBuf,
}

impl Persona {
    pub fn new(
        id: impl Into<String>,
        instruction: impl Into<String>,
        delta: LoraDelta,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            instruction: instruction.into(),
            delta,
            source: source.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// System-style instruction prepended to every prompt.
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn delta(&self) -> &LoraDelta {
        &self.delta
    }

    /// Directory the adapter weights were loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }
}
