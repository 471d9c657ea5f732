//! Model endpoint resolution.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{info, warn};

use chatrelay_core::config::ModelSelection;

use crate::error::RelayError;

/// A chat model the request handler can be bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub id: String,
    pub name: String,
    pub family: String,
    pub version: String,
    pub max_input_tokens: u32,
    pub max_output_tokens: u32,
    pub supports_tool_calls: bool,
    pub supports_vision: bool,
}

impl ModelEndpoint {
    /// Endpoint with the given id and generic capabilities.
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            family: id.clone(),
            id,
            version: "1".into(),
            max_input_tokens: 128_000,
            max_output_tokens: 16_000,
            supports_tool_calls: true,
            supports_vision: false,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Model '{model}' is not available: {reason}")]
pub struct EndpointError {
    pub model: String,
    pub reason: String,
}

/// Looks up chat endpoints by model id.
#[async_trait]
pub trait EndpointProvider: Send + Sync {
    async fn chat_endpoint(&self, model_id: &str) -> Result<ModelEndpoint, EndpointError>;
}

/// Resolve the model the relay is bound to.
///
/// The exact model is tried first; if it is unset or fails, the preferred
/// candidates are tried in order. Individual failures are logged, not fatal.
pub async fn resolve_default_model(
    provider: &dyn EndpointProvider,
    selection: &ModelSelection,
) -> Result<ModelEndpoint, RelayError> {
    let mut tried = Vec::new();

    if let Some(exact) = selection.exact.as_deref() {
        match provider.chat_endpoint(exact).await {
            Ok(endpoint) => {
                info!(model = exact, "Using explicitly configured model");
                return Ok(endpoint);
            }
            Err(e) => {
                warn!(model = exact, error = %e, "Failed to resolve explicit model");
                tried.push(exact.to_string());
            }
        }
    }

    for candidate in selection.candidates() {
        match provider.chat_endpoint(&candidate).await {
            Ok(endpoint) => {
                info!(model = %candidate, "Resolved model");
                return Ok(endpoint);
            }
            Err(e) => {
                warn!(model = %candidate, error = %e, "Failed to resolve model");
                tried.push(candidate);
            }
        }
    }

    Err(RelayError::ModelResolution {
        tried: tried.join(", "),
    })
}

/// Fixed set of endpoints.
#[derive(Debug, Clone, Default)]
pub struct StaticEndpointProvider {
    endpoints: HashMap<String, ModelEndpoint>,
}

impl StaticEndpointProvider {
    pub fn new(endpoints: impl IntoIterator<Item = ModelEndpoint>) -> Self {
        Self {
            endpoints: endpoints.into_iter().map(|e| (e.id.clone(), e)).collect(),
        }
    }

    /// Provider exposing generic endpoints for the given ids.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(ids.into_iter().map(ModelEndpoint::named))
    }
}

#[async_trait]
impl EndpointProvider for StaticEndpointProvider {
    async fn chat_endpoint(&self, model_id: &str) -> Result<ModelEndpoint, EndpointError> {
        self.endpoints
            .get(model_id)
            .cloned()
            .ok_or_else(|| EndpointError {
                model: model_id.to_string(),
                reason: "unknown model".into(),
            })
    }
}
