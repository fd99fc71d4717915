//! Model Routing
//!
//! Maps client-visible model names onto a provider and backend model id.

use crate::config::RoutingConfig;
use crate::error::{GatewayError, Result};

/// Resolved routing target for a client model name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    /// Provider name (e.g., "openai", "acme")
    pub provider: String,

    /// Identifier the provider's API expects
    pub backend_model: String,
}

impl std::fmt::Display for ModelRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.backend_model)
    }
}

/// Resolves model names against one routing snapshot
///
/// Matching is exact and case-sensitive; there is no prefix or fuzzy
/// fallback.
#[derive(Debug, Clone, Copy)]
pub struct ModelResolver<'a> {
    config: &'a RoutingConfig,
}

impl<'a> ModelResolver<'a> {
    pub fn new(config: &'a RoutingConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, model: &str) -> Result<ModelRoute> {
        let provider =
            self.config
                .provider_for(model)
                .ok_or_else(|| GatewayError::UnknownModel {
                    model: model.to_string(),
                })?;

        let backend_model = self
            .config
            .routes_for(provider)
            .and_then(|routes| routes.get(model))
            .ok_or_else(|| GatewayError::RouteNotConfigured {
                model: model.to_string(),
                provider: provider.to_string(),
            })?;

        Ok(ModelRoute {
            provider: provider.to_string(),
            backend_model: backend_model.clone(),
        })
    }
}
