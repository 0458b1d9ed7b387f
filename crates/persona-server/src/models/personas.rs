use persona_engine::Persona;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaInfo {
    pub id: String,
    pub instruction: String,
}

impl From<&Persona> for PersonaInfo {
    fn from(persona: &Persona) -> Self {
        Self {
            id: persona.id().to_string(),
            instruction: persona.instruction().to_string(),
        }
    }
}

/// Body of `GET /personas`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaList {
    pub personas: Vec<PersonaInfo>,
}
