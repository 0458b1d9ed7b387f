//! Turning a [`GatewayConfig`] into a ready [`AppState`].
//!
//! Any failure here is fatal: the gateway never serves with a partial
//! registry or an engine that cannot apply every configured adapter.

use std::sync::Arc;
use std::time::Duration;

use persona_engine::GenerationEngine;
use persona_gateway::{AdapterError, Registry};
use persona_rag::{ContextProvider, JsonlIndex, RagError};
use persona_runtime::telemetry::LogTelemetry;
use persona_runtime::{LoraEngine, RuntimeError, ScriptedEngine};

use crate::config::{ConfigError, EngineKind, GatewayConfig};
use crate::state::AppState;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("persona registry: {0}")]
    Registry(#[from] AdapterError),

    #[error("engine: {0}")]
    Engine(#[from] RuntimeError),

    #[error("retrieval corpus: {0}")]
    Rag(#[from] RagError),

    #[error("server: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_state(config: GatewayConfig) -> Result<AppState, StartupError> {
    let registry = Registry::load(&config.personas)?;
    let engine = build_engine(&config, &registry)?;
    let context = build_context(&config)?;

    tracing::info!(
        personas = registry.len(),
        engine = ?config.engine.kind,
        retrieval = context.is_some(),
        "gateway ready"
    );
    let state = AppState::new(engine, registry, config);
    Ok(match context {
        Some(context) => state.with_context(context),
        None => state,
    })
}

pub fn build_engine(
    config: &GatewayConfig,
    registry: &Registry,
) -> Result<Box<dyn GenerationEngine>, StartupError> {
    match config.engine.kind {
        EngineKind::Lora => {
            let engine = LoraEngine::load(&config.engine.base_model)?
                .with_telemetry(Arc::new(LogTelemetry::new()));
            for persona in registry.iter() {
                engine.check(persona)?;
            }
            Ok(Box::new(engine))
        }
        EngineKind::Scripted => Ok(Box::new(ScriptedEngine::new().with_fragment_delay(
            Duration::from_millis(config.engine.fragment_delay_ms),
        ))),
    }
}

/// The retrieval provider, when `[rag]` is configured and its corpus has
/// documents.
pub fn build_context(config: &GatewayConfig) -> Result<Option<Arc<dyn ContextProvider>>, StartupError> {
    let Some(rag) = &config.rag else {
        return Ok(None);
    };
    let index = JsonlIndex::load(&rag.corpus_dir, rag.top_k, rag.max_docs)?;
    if index.is_empty() {
        tracing::warn!(corpus = %rag.corpus_dir.display(), "retrieval corpus is empty, context disabled");
        return Ok(None);
    }
    Ok(Some(Arc::new(index)))
}
