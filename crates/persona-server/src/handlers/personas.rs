use axum::{extract::State, Json};

use crate::models::{PersonaInfo, PersonaList};
use crate::state::AppState;

/// List configured personas in configuration order.
pub async fn handle_personas(State(state): State<AppState>) -> Json<PersonaList> {
    Json(PersonaList {
        personas: state
            .registry
            .iter()
            .map(|persona| PersonaInfo::from(persona.as_ref()))
            .collect(),
    })
}
