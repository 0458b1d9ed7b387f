//! Health check handler.

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::state::AppState;

/// Liveness, version and gate counters.
pub async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let status = if state.shutdown.is_cancelled() {
        "shutting_down"
    } else {
        "ok"
    };
    Json(json!({
        "status": status,
        "version": persona_gateway::VERSION,
        "personas": state.registry.len(),
        "gate": state.gate.stats(),
    }))
}
