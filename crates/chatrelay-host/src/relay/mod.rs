//! Relay orchestrator: owns the gateway worker and everything in flight.

mod orchestrator;
mod pending;
mod state;

pub use orchestrator::{RelayOrchestrator, prompt_preview, sanitize_metadata};
pub use state::LifecycleState;
