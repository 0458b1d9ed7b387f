//! # persona-runtime
//!
//! Concrete [`GenerationEngine`](persona_engine::GenerationEngine)
//! implementations for the persona gateway.
//!
//! - [`LoraEngine`]: a small word-level base model with one active LoRA delta
//!   on its output projection, sampled through `persona-sampling`
//! - [`ScriptedEngine`]: deterministic per-persona scripts with fault
//!   injection and an [`EngineProbe`] for observing concurrency
//! - [`telemetry`]: TTFT and throughput hooks

pub mod base;
mod error;
mod lora;
mod scripted;
pub mod telemetry;

pub use base::{BaseConfig, BaseModel};
pub use error::{Result, RuntimeError};
pub use lora::{render_prompt, LoraEngine};
pub use scripted::{EngineProbe, Fault, ScriptedEngine};
