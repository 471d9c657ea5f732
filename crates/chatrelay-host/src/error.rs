//! Host error types.

use std::time::Duration;

use chatrelay_core::transport::LaunchError;

/// Errors surfaced by [`RelayOrchestrator`](crate::RelayOrchestrator) lifecycle calls.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Unable to resolve a chat model (tried: {tried})")]
    ModelResolution { tried: String },

    #[error("Failed to launch gateway: {0}")]
    Launch(#[from] LaunchError),

    #[error("Gateway did not report ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("Gateway exited during startup (code {code:?})")]
    WorkerExited { code: Option<i32> },

    #[error("Configuration error: {0}")]
    Config(#[from] chatrelay_core::Error),
}

/// How a request handler invocation failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("{message}")]
    Failed { message: String },
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Status reported to the client in `responseError`.
    pub const fn status(&self) -> u16 {
        match self {
            Self::Cancelled => 499,
            Self::Failed { .. } => 500,
        }
    }
}
