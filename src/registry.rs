//! The persona registry.
//!
//! Built once at startup from configuration and never mutated afterwards, so
//! lookups from many request tasks need no locking.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use persona_engine::{Persona, PersonaHandle};
use serde::{Deserialize, Serialize};

use crate::adapter::load_adapter;
use crate::error::{AdapterError, Result};

/// One persona entry as written in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Path-style selector, e.g. `kant`. Matched case-insensitively.
    pub id: String,

    /// System-style instruction text.
    pub instruction: String,

    /// Adapter directory.
    pub adapter: PathBuf,
}

/// Immutable table of loaded personas.
#[derive(Debug, Default)]
pub struct Registry {
    personas: HashMap<String, PersonaHandle>,
    order: Vec<String>,
}

impl Registry {
    /// Load every configured persona and its adapter.
    ///
    /// Fails on the first missing or malformed adapter, empty or duplicate id.
    pub fn load(configs: &[PersonaConfig]) -> Result<Self> {
        let mut personas = HashMap::with_capacity(configs.len());
        let mut order = Vec::with_capacity(configs.len());

        for config in configs {
            let id = config.id.trim().to_lowercase();
            if id.is_empty() {
                return Err(AdapterError::InvalidPersona {
                    id: config.id.clone(),
                    reason: "id must not be empty".into(),
                });
            }
            if id.contains('/') || id.chars().any(char::is_whitespace) {
                return Err(AdapterError::InvalidPersona {
                    id: config.id.clone(),
                    reason: "id must be a single path segment".into(),
                });
            }
            if personas.contains_key(&id) {
                return Err(AdapterError::DuplicatePersona(id));
            }

            let delta = load_adapter(&config.adapter)?;
            let persona = Persona::new(
                id.clone(),
                config.instruction.clone(),
                delta,
                config.adapter.clone(),
            );
            tracing::info!(persona = %id, adapter = %config.adapter.display(), "registered persona");
            personas.insert(id.clone(), Arc::new(persona));
            order.push(id);
        }

        Ok(Registry { personas, order })
    }

    /// Look up a persona by id (case-insensitive).
    pub fn resolve(&self, name: &str) -> Option<PersonaHandle> {
        self.personas.get(&name.to_lowercase()).cloned()
    }

    /// Persona ids in configuration order.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Personas in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &PersonaHandle> {
        self.order.iter().filter_map(|id| self.personas.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
