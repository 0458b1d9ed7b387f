//! HTTP request handlers.

pub mod completion;
pub mod health;
pub mod personas;

pub use completion::handle_completion;
pub use health::handle_health;
pub use personas::handle_personas;
