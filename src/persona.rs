//! Flat persona descriptors.
//!
//! Personality text and prompt styling live upstream; the core only needs an
//! identifier, a backend affinity, and a role hint. Core personas carry the
//! reasoning-heavy roles and prefer the main backend; support personas do
//! mechanical and documentation work on the local model.

use crate::backend::BackendId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_backend: Option<BackendId>,
    pub role_hint: String,
    /// Core personas route to main under HYBRID mode; support personas go
    /// local with main fallback.
    pub is_core: bool,
}

impl Persona {
    fn new(id: &str, preferred: BackendId, role_hint: &str, is_core: bool) -> Self {
        Self {
            id: id.to_string(),
            preferred_backend: Some(preferred),
            role_hint: role_hint.to_string(),
            is_core,
        }
    }
}

/// The built-in persona set.
pub struct PersonaRegistry {
    personas: Vec<Persona>,
}

impl Default for PersonaRegistry {
    fn default() -> Self {
        Self {
            personas: vec![
                Persona::new("athena", BackendId::Main, "strategic architect", true),
                Persona::new("artemis", BackendId::Main, "technical perfectionist", true),
                Persona::new("hestia", BackendId::Main, "security auditor", true),
                Persona::new("bellona", BackendId::Local, "tactical coordinator", false),
                Persona::new("seshat", BackendId::Local, "documentation specialist", false),
            ],
        }
    }
}

impl PersonaRegistry {
    pub fn get(&self, id: &str) -> Option<&Persona> {
        let id = id.to_ascii_lowercase();
        self.personas.iter().find(|p| p.id == id)
    }

    pub fn all(&self) -> &[Persona] {
        &self.personas
    }

    /// Resolve a list of persona names, failing on the first unknown one.
    pub fn resolve(&self, ids: &[String]) -> Result<Vec<Persona>, crate::error::CollabError> {
        ids.iter()
            .map(|id| {
                self.get(id)
                    .cloned()
                    .ok_or_else(|| crate::error::CollabError::UnknownPersona(id.clone()))
            })
            .collect()
    }
}
