//! Request and response bodies.

pub mod completion;
pub mod personas;

pub use completion::CompletionRequest;
pub use personas::{PersonaInfo, PersonaList};
