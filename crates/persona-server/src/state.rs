//! Application state shared across handlers.

use std::sync::Arc;

use persona_engine::GenerationEngine;
use persona_gateway::Registry;
use persona_rag::{ContextProvider, NoContext};
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::gate::EngineGate;

#[derive(Clone)]
pub struct AppState {
    /// The only path to the engine.
    pub gate: EngineGate,
    pub registry: Arc<Registry>,
    pub config: Arc<GatewayConfig>,
    /// Retrieval seam; [`NoContext`] unless configured.
    pub context: Arc<dyn ContextProvider>,
    /// Cancelled once on shutdown; every session token is a child of it.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: Box<dyn GenerationEngine>, registry: Registry, config: GatewayConfig) -> Self {
        Self {
            gate: EngineGate::new(engine),
            registry: Arc::new(registry),
            config: Arc::new(config),
            context: Arc::new(NoContext),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }
}
