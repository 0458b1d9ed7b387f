//! Adapter weights and the persona registry.
//!
//! This crate loads everything the gateway needs from disk before it starts
//! serving: LoRA adapter directories (`adapter_config.json` +
//! `adapter_model.safetensors`) and the persona table that names them.
//! Loading is all-or-nothing; a registry that fails to load means the
//! process cannot serve.

pub mod adapter;
pub mod error;
pub mod registry;
pub mod weights;

pub use adapter::{load_adapter, save_adapter, AdapterConfig};
pub use error::{AdapterError, Result};
pub use registry::{PersonaConfig, Registry};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
