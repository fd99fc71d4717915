//! Listing and Admin Types
//!
//! OpenAI-shaped model listing plus the provider status and reload payloads
//! of the admin surface.

use crate::config::RoutingConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One entry of `/v1/models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

/// Response body of `/v1/models`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    /// Every routable model of a snapshot, sorted by id.
    pub fn from_config(config: &RoutingConfig) -> Self {
        let created = config.loaded_at().timestamp();
        let data = config
            .model_assignments()
            .into_iter()
            .map(|(model, provider)| ModelCard {
                id: model.to_string(),
                object: "model".to_string(),
                created,
                owned_by: format!("llm-gateway-{}", provider),
            })
            .collect();

        Self {
            object: "list".to_string(),
            data,
        }
    }
}

/// Credential health of one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub provider: String,
    pub custom: bool,
    pub base_url: Option<String>,
    pub slots: usize,

    /// Whether every slot resolves from the environment right now
    pub credentials_available: bool,
    pub models: Vec<String>,
}

impl ProviderStatus {
    /// Status of every provider, in precedence order.
    pub fn from_config(config: &RoutingConfig) -> Vec<Self> {
        let assignments = config.model_assignments();
        config
            .provider_order()
            .iter()
            .map(|provider| {
                let pool = config.pool(provider);
                ProviderStatus {
                    provider: provider.clone(),
                    custom: config.is_custom(provider),
                    base_url: config.base_url(provider).map(str::to_string),
                    slots: pool.map_or(0, |pool| pool.len()),
                    credentials_available: pool.is_some_and(|pool| pool.all_available()),
                    models: assignments
                        .iter()
                        .filter(|(_, owner)| *owner == provider.as_str())
                        .map(|(model, _)| model.to_string())
                        .collect(),
                }
            })
            .collect()
    }
}

/// Body of `POST /admin/reload`
///
/// An empty body rereads the configuration the gateway started from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadRequest {
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// A full YAML document
    #[serde(default)]
    pub inline: Option<String>,
}

/// Result of a successful reload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadSummary {
    pub generation: u64,
    pub models: usize,
    pub providers: usize,
}

impl ReloadSummary {
    pub fn from_config(config: &RoutingConfig) -> Self {
        Self {
            generation: config.generation(),
            models: config.model_names().len(),
            providers: config.provider_order().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::routing::tests::acme_config;

    #[test]
    fn test_model_list_shape() {
        let config = acme_config();
        let list = ModelList::from_config(&config);

        assert_eq!(list.object, "list");
        assert_eq!(list.data.len(), 1);
        assert_eq!(list.data[0].id, "fast-model");
        assert_eq!(list.data[0].owned_by, "llm-gateway-acme");
        assert_eq!(list.data[0].created, config.loaded_at().timestamp());

        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(json["data"][0]["object"], "model");
    }

    #[test]
    fn test_provider_status() {
        let statuses = ProviderStatus::from_config(&acme_config());
        assert_eq!(statuses.len(), 1);

        let acme = &statuses[0];
        assert_eq!(acme.provider, "acme");
        assert_eq!(acme.slots, 2);
        assert!(acme.credentials_available);
        assert!(!acme.custom);
        assert_eq!(acme.models, vec!["fast-model"]);
    }

    #[test]
    fn test_reload_request_variants() {
        let empty: ReloadRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ReloadRequest::default());

        let path: ReloadRequest = serde_json::from_str(r#"{"path": "/etc/gw.yaml"}"#).unwrap();
        assert_eq!(path.path, Some(PathBuf::from("/etc/gw.yaml")));
    }
}
