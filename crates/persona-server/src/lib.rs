//! # persona-server
//!
//! Streaming HTTP front end for one shared generation engine.
//!
//! A request names a persona; the gateway validates it, waits its turn at
//! the [`EngineGate`], switches the engine to that persona and streams the
//! output as Server-Sent Events. Dropping the connection cancels the
//! generation and frees the engine for the next request.

pub mod cancel;
pub mod config;
pub mod encoder;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod logging;
pub mod models;
pub mod producer;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod startup;
pub mod state;

pub use cancel::{CancelController, CancelGuard, CancelReason};
pub use config::{ConfigError, EngineKind, GatewayConfig};
pub use encoder::StreamEvent;
pub use error::ServerError;
pub use gate::{EngineGate, GateStats, Ticket};
pub use server::{create_router, run_server};
pub use session::{GenerationRequest, GenerationSession, SessionState, VisibleText};
pub use startup::{build_state, StartupError};
pub use state::AppState;
