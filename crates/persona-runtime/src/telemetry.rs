//! Telemetry hooks for generation performance measurement.
//!
//! Provides:
//! - [`GenerationMetrics`]: TTFT, fragments/sec and a generation summary
//! - [`TelemetryHook`]: callback interface for real-time metric reporting
//! - [`GenerationTimer`]: records timestamps and computes metrics
//! - [`NoopTelemetry`] / [`LogTelemetry`]: built-in hook implementations

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Why a generation stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndOfOutput,
    TokenBudget,
    Cancelled,
    Fault,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EndOfOutput => write!(f, "end_of_output"),
            StopReason::TokenBudget => write!(f, "token_budget"),
            StopReason::Cancelled => write!(f, "cancelled"),
            StopReason::Fault => write!(f, "fault"),
        }
    }
}

/// Aggregate metrics from a generation run.
#[derive(Debug, Clone)]
pub struct GenerationMetrics {
    pub persona: String,
    /// Time to first fragment in milliseconds.
    pub ttft_ms: f64,
    /// Fragments generated per second after the first one.
    pub fragments_per_sec: f64,
    pub prompt_tokens: usize,
    pub generated_fragments: usize,
    /// Total wall-clock time in milliseconds.
    pub total_time_ms: f64,
    pub stop: StopReason,
}

/// Callback trait for real-time generation telemetry.
///
/// All methods have default no-op implementations so hooks can be selective.
pub trait TelemetryHook: Send + Sync {
    fn on_first_fragment(&self, _ttft_ms: f64) {}

    fn on_fragment(&self, _index: usize, _elapsed_ms: f64) {}

    fn on_generation_complete(&self, _metrics: &GenerationMetrics) {}
}

/// No-op telemetry hook.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetryHook for NoopTelemetry {}

/// Logs each completed generation and keeps the last report.
#[derive(Debug, Clone, Default)]
pub struct LogTelemetry {
    last_report: Arc<Mutex<Option<GenerationMetrics>>>,
}

impl LogTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics of the last completed generation.
    pub fn last_metrics(&self) -> Option<GenerationMetrics> {
        self.last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl TelemetryHook for LogTelemetry {
    fn on_generation_complete(&self, metrics: &GenerationMetrics) {
        tracing::info!(
            persona = %metrics.persona,
            ttft_ms = metrics.ttft_ms,
            fragments_per_sec = metrics.fragments_per_sec,
            prompt_tokens = metrics.prompt_tokens,
            fragments = metrics.generated_fragments,
            total_ms = metrics.total_time_ms,
            stop = %metrics.stop,
            "generation complete"
        );
        *self
            .last_report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(metrics.clone());
    }
}

/// Records timestamps during a generation to compute [`GenerationMetrics`].
pub struct GenerationTimer {
    persona: String,
    prompt_tokens: usize,
    start: Instant,
    first_fragment: Option<Instant>,
    fragments: usize,
    hook: Arc<dyn TelemetryHook>,
}

impl GenerationTimer {
    pub fn new(persona: impl Into<String>, prompt_tokens: usize, hook: Arc<dyn TelemetryHook>) -> Self {
        Self {
            persona: persona.into(),
            prompt_tokens,
            start: Instant::now(),
            first_fragment: None,
            fragments: 0,
            hook,
        }
    }

    /// Record one emitted fragment.
    pub fn mark_fragment(&mut self) {
        let now = Instant::now();
        let elapsed_ms = now.duration_since(self.start).as_secs_f64() * 1000.0;
        if self.first_fragment.is_none() {
            self.first_fragment = Some(now);
            self.hook.on_first_fragment(elapsed_ms);
        }
        self.fragments += 1;
        self.hook.on_fragment(self.fragments, elapsed_ms);
    }

    /// Finalize and return metrics. Fires `on_generation_complete`.
    pub fn finish(self, stop: StopReason) -> GenerationMetrics {
        let total_time_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        let ttft_ms = self
            .first_fragment
            .map(|t| t.duration_since(self.start).as_secs_f64() * 1000.0)
            .unwrap_or(0.0);

        let decode_ms = total_time_ms - ttft_ms;
        let fragments_per_sec = if decode_ms > 0.0 && self.fragments > 1 {
            (self.fragments - 1) as f64 / (decode_ms / 1000.0)
        } else {
            0.0
        };

        let metrics = GenerationMetrics {
            persona: self.persona,
            ttft_ms,
            fragments_per_sec,
            prompt_tokens: self.prompt_tokens,
            generated_fragments: self.fragments,
            total_time_ms,
            stop,
        };
        self.hook.on_generation_complete(&metrics);
        metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_counts_fragments() {
        let log = LogTelemetry::new();
        let mut timer = GenerationTimer::new("kant", 3, Arc::new(log.clone()));
        timer.mark_fragment();
        timer.mark_fragment();
        let metrics = timer.finish(StopReason::EndOfOutput);

        assert_eq!(metrics.generated_fragments, 2);
        assert_eq!(metrics.prompt_tokens, 3);
        assert!(metrics.total_time_ms >= metrics.ttft_ms);

        let captured = log.last_metrics().unwrap();
        assert_eq!(captured.persona, "kant");
        assert_eq!(captured.stop, StopReason::EndOfOutput);
    }

    #[test]
    fn timer_without_fragments() {
        let timer = GenerationTimer::new("marx", 1, Arc::new(NoopTelemetry));
        let metrics = timer.finish(StopReason::Cancelled);
        assert_eq!(metrics.ttft_ms, 0.0);
        assert_eq!(metrics.fragments_per_sec, 0.0);
        assert_eq!(metrics.generated_fragments, 0);
    }

    #[test]
    fn stop_reason_display() {
        assert_eq!(StopReason::TokenBudget.to_string(), "token_budget");
    }
}
