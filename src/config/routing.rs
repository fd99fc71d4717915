//! Routing Configuration
//!
//! The validated, immutable snapshot every request is served from.

use crate::config::document::{ConfigDocument, GatewaySettings, OrderedMap};
use crate::config::provider::{builtin_base_url, CustomRouteConfig, API_KEY_PARAM};
use crate::error::{ConfigValidationError, GatewayError, Result};
use crate::router::key_rotator::{Credential, CredentialPool, CredentialSlot, SlotVariable};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};

/// A provider whose endpoint and credential live in its own route table
#[derive(Debug, Clone, PartialEq)]
pub struct CustomProvider {
    /// Environment variable holding the API key
    pub credential_env: String,
    pub base_url: String,
    pub model_routes: HashMap<String, String>,
}

/// Immutable routing snapshot
///
/// Built only through [`RoutingConfig::from_document`], which checks every
/// invariant; the store replaces it wholesale and never mutates it.
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    pub(crate) generation: u64,
    pub(crate) loaded_at: DateTime<Utc>,
    pub(crate) provider_order: Vec<String>,
    pub(crate) model_to_provider: HashMap<String, String>,
    pub(crate) provider_routes: HashMap<String, HashMap<String, String>>,
    pub(crate) custom_providers: HashMap<String, CustomProvider>,
    pub(crate) endpoints: HashMap<String, String>,
    pub(crate) pools: HashMap<String, CredentialPool>,
    pub(crate) default_model: Option<String>,
    pub(crate) settings: GatewaySettings,
}

impl RoutingConfig {
    /// Build and validate a snapshot from a parsed document.
    pub fn from_document(
        document: &ConfigDocument,
    ) -> std::result::Result<Self, ConfigValidationError> {
        let settings = document.gateway();
        settings.validate()?;

        for provider in document.custom_model_routes.keys() {
            if document.model_routes.contains_key(provider) {
                return Err(ConfigValidationError::InvalidCustomProvider {
                    provider: provider.clone(),
                    reason: "also declared in model_routes".to_string(),
                });
            }
        }

        let provider_order = order_providers(document)?;

        let mut provider_routes = HashMap::new();
        let mut endpoints = HashMap::new();
        let mut pools = HashMap::new();

        for (provider, routes) in document.model_routes.iter() {
            provider_routes.insert(provider.clone(), to_hash_map(routes));

            let key_config = document.provider_keys_configs.get(provider);
            let base_url = key_config
                .and_then(|config| config.base_url.clone())
                .or_else(|| builtin_base_url(provider).map(str::to_string));
            if let Some(base_url) = base_url {
                endpoints.insert(provider.clone(), base_url);
            }

            if let Some(slots) = document.model_keys.get(provider) {
                let mapping = key_config.map(|config| &config.env_mapping);
                let slots = build_slots(provider, slots, mapping)?;
                let defaults = key_config
                    .map(|config| config.defaults.clone())
                    .unwrap_or_default();
                pools.insert(
                    provider.clone(),
                    CredentialPool::new(provider, slots, defaults),
                );
            }
        }

        let mut custom_providers = HashMap::new();
        for (provider, custom) in document.custom_model_routes.iter() {
            let entry = build_custom_provider(provider, custom)?;
            pools.insert(
                provider.clone(),
                CredentialPool::new(
                    provider,
                    vec![CredentialSlot::api_key(
                        API_KEY_PARAM,
                        entry.credential_env.clone(),
                    )],
                    BTreeMap::new(),
                ),
            );
            custom_providers.insert(provider.clone(), entry);
        }

        let mut model_to_provider: HashMap<String, String> = document
            .provider_config
            .iter()
            .map(|(model, provider)| (model.clone(), provider.clone()))
            .collect();

        // Custom tables claim the models nobody assigned explicitly; the first
        // custom provider in precedence order wins.
        for provider in &provider_order {
            if let Some(custom) = document.custom_model_routes.get(provider) {
                for model in custom.models.keys() {
                    model_to_provider
                        .entry(model.clone())
                        .or_insert_with(|| provider.clone());
                }
            }
        }

        let config = Self {
            generation: 0,
            loaded_at: Utc::now(),
            provider_order,
            model_to_provider,
            provider_routes,
            custom_providers,
            endpoints,
            pools,
            default_model: document.default_model.clone(),
            settings,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the cross-table invariants.
    pub fn validate(&self) -> std::result::Result<(), ConfigValidationError> {
        self.settings.validate()?;

        let mut models: Vec<_> = self.model_to_provider.iter().collect();
        models.sort();

        for (model, provider) in models {
            let routes = match self.routes_for(provider) {
                Some(routes) => routes,
                None => {
                    return Err(ConfigValidationError::UnknownProvider {
                        model: model.clone(),
                        provider: provider.clone(),
                    })
                }
            };

            if !routes.contains_key(model) {
                return Err(ConfigValidationError::MissingModelRoute {
                    model: model.clone(),
                    provider: provider.clone(),
                });
            }

            if self.pools.get(provider).map_or(true, CredentialPool::is_empty) {
                return Err(ConfigValidationError::EmptyCredentialPool {
                    provider: provider.clone(),
                });
            }

            if self.base_url(provider).is_none() {
                return Err(ConfigValidationError::MissingBaseUrl {
                    provider: provider.clone(),
                });
            }
        }

        if let Some(model) = &self.default_model {
            if !self.model_to_provider.contains_key(model) {
                return Err(ConfigValidationError::InvalidDefaultModel(model.clone()));
            }
        }

        Ok(())
    }

    /// Monotonic number assigned by the store; 0 until installed.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn default_model(&self) -> Option<&str> {
        self.default_model.as_deref()
    }

    pub fn provider_order(&self) -> &[String] {
        &self.provider_order
    }

    /// Provider assigned to a client model name.
    pub fn provider_for(&self, model: &str) -> Option<&str> {
        self.model_to_provider.get(model).map(String::as_str)
    }

    /// Route table of a standard or custom provider.
    pub fn routes_for(&self, provider: &str) -> Option<&HashMap<String, String>> {
        match self.custom_providers.get(provider) {
            Some(custom) => Some(&custom.model_routes),
            None => self.provider_routes.get(provider),
        }
    }

    pub fn is_custom(&self, provider: &str) -> bool {
        self.custom_providers.contains_key(provider)
    }

    /// Endpoint root for a provider.
    pub fn base_url(&self, provider: &str) -> Option<&str> {
        match self.custom_providers.get(provider) {
            Some(custom) => Some(custom.base_url.as_str()),
            None => self.endpoints.get(provider).map(String::as_str),
        }
    }

    pub fn pool(&self, provider: &str) -> Option<&CredentialPool> {
        self.pools.get(provider)
    }

    /// Next credential for `provider` in round-robin order.
    pub fn next_credential(&self, provider: &str) -> Result<Credential> {
        self.pools
            .get(provider)
            .ok_or_else(|| GatewayError::CredentialUnavailable {
                provider: provider.to_string(),
                slot: "<none>".to_string(),
                variable: "<no credential pool configured>".to_string(),
            })?
            .next()
    }

    /// Client-visible model names, sorted.
    pub fn model_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.model_to_provider.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// (model, provider) pairs sorted by model.
    pub fn model_assignments(&self) -> Vec<(&str, &str)> {
        let mut pairs: Vec<_> = self
            .model_to_provider
            .iter()
            .map(|(m, p)| (m.as_str(), p.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    /// Carry rotation cursors over from the snapshot being replaced.
    pub(crate) fn inherit_rotation(&mut self, previous: &RoutingConfig) {
        for (provider, pool) in self.pools.iter_mut() {
            if let Some(old) = previous.pools.get(provider) {
                pool.inherit_cursor(old);
            }
        }
    }
}

fn to_hash_map(map: &OrderedMap<String>) -> HashMap<String, String> {
    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
}

fn order_providers(
    document: &ConfigDocument,
) -> std::result::Result<Vec<String>, ConfigValidationError> {
    let declared: Vec<String> = document
        .model_routes
        .keys()
        .chain(document.custom_model_routes.keys())
        .cloned()
        .collect();

    let mut order = Vec::with_capacity(declared.len());
    if let Some(explicit) = &document.provider_order {
        for provider in explicit {
            if !declared.contains(provider) {
                return Err(ConfigValidationError::UnknownOrderedProvider(
                    provider.clone(),
                ));
            }
            if !order.contains(provider) {
                order.push(provider.clone());
            }
        }
    }
    for provider in declared {
        if !order.contains(&provider) {
            order.push(provider);
        }
    }
    Ok(order)
}

fn build_slots(
    provider: &str,
    slots: &OrderedMap<OrderedMap<String>>,
    mapping: Option<&BTreeMap<String, String>>,
) -> std::result::Result<Vec<CredentialSlot>, ConfigValidationError> {
    let invalid = |slot: &str, reason: String| ConfigValidationError::InvalidSlot {
        provider: provider.to_string(),
        slot: slot.to_string(),
        reason,
    };

    let mut built = Vec::with_capacity(slots.len());
    for (slot, variables) in slots.iter() {
        if variables.is_empty() {
            return Err(invalid(slot, "slot names no variables".to_string()));
        }
        if mapping.is_none() && variables.len() > 1 {
            return Err(invalid(
                slot,
                "several variables but no provider_keys_configs env_mapping".to_string(),
            ));
        }

        let mut resolved = Vec::with_capacity(variables.len());
        for (name, source) in variables.iter() {
            if source.trim().is_empty() {
                return Err(invalid(slot, format!("variable '{}' has no source", name)));
            }
            let param = match mapping {
                Some(mapping) => mapping.get(name).cloned().ok_or_else(|| {
                    invalid(slot, format!("variable '{}' is not in env_mapping", name))
                })?,
                None => API_KEY_PARAM.to_string(),
            };
            resolved.push(SlotVariable {
                source: source.clone(),
                param,
            });
        }
        built.push(CredentialSlot::new(slot.clone(), resolved));
    }
    Ok(built)
}

fn build_custom_provider(
    provider: &str,
    custom: &CustomRouteConfig,
) -> std::result::Result<CustomProvider, ConfigValidationError> {
    let invalid = |reason: &str| ConfigValidationError::InvalidCustomProvider {
        provider: provider.to_string(),
        reason: reason.to_string(),
    };

    if custom.api_key.trim().is_empty() {
        return Err(invalid("api_key must name an environment variable"));
    }
    if custom.base_url.trim().is_empty() {
        return Err(invalid("base_url is required"));
    }

    Ok(CustomProvider {
        credential_env: custom.api_key.clone(),
        base_url: custom.base_url.clone(),
        model_routes: to_hash_map(&custom.models),
    })
}
