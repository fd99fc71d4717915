//! Configuration Document
//!
//! The raw YAML schema as written by operators, before validation.

use crate::config::provider::{CustomRouteConfig, KeyMappingConfig};
use crate::error::ConfigValidationError;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

/// Map that keeps the order keys were declared in.
///
/// Inserting an existing key replaces its value in place, so the last
/// declaration wins without moving the entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V>(Vec<(String, V)>);

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn insert(&mut self, key: String, value: V) {
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.0.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merge `other` into `self`; entries of `other` win.
    pub fn merge(&mut self, other: OrderedMap<V>) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(k, v)| (k, v)))
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping")
            }

            fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::new())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = OrderedMap::new();
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    map.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(OrderedVisitor(PhantomData))
    }
}

/// Retry and timeout policy for upstream calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    /// Retries after the first attempt on transient failures
    pub max_retries: u32,

    /// Delay before the first retry, in milliseconds
    pub retry_delay_ms: u64,

    /// Growth factor between retries (1.0 keeps the delay constant)
    pub backoff_multiplier: f64,

    /// Upper bound for a single retry delay, in milliseconds
    pub max_retry_delay_ms: u64,

    /// Bound for one upstream attempt, in seconds
    pub timeout_secs: u64,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 500,
            backoff_multiplier: 1.0,
            max_retry_delay_ms: 30_000,
            timeout_secs: 30,
        }
    }
}

impl GatewaySettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.timeout_secs == 0 {
            return Err(ConfigValidationError::Settings(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigValidationError::Settings(format!(
                "backoff_multiplier must be >= 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if self.max_retry_delay_ms < self.retry_delay_ms {
            return Err(ConfigValidationError::Settings(
                "max_retry_delay_ms must not be smaller than retry_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listener settings, read once at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// Root configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewaySettings>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSettings>,

    /// Explicit provider precedence; unlisted providers follow in declaration order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_order: Option<Vec<String>>,

    /// Model used when a request does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,

    /// provider -> slot name -> logical variable -> environment variable
    #[serde(default)]
    pub model_keys: OrderedMap<OrderedMap<OrderedMap<String>>>,

    /// provider -> how slot variables map onto upstream parameters
    #[serde(default)]
    pub provider_keys_configs: OrderedMap<KeyMappingConfig>,

    /// client model name -> provider
    #[serde(default)]
    pub provider_config: OrderedMap<String>,

    /// provider -> client model name -> backend model id
    #[serde(default)]
    pub model_routes: OrderedMap<OrderedMap<String>>,

    /// custom provider -> self-contained endpoint and model table
    #[serde(default)]
    pub custom_model_routes: OrderedMap<CustomRouteConfig>,
}

impl ConfigDocument {
    /// Parse a YAML (or JSON) document.
    pub fn from_yaml(source: &str) -> Result<Self, ConfigValidationError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yml::from_str(source).map_err(|e| ConfigValidationError::Parse(e.to_string()))
    }

    /// Layer `other` on top of `self`; later documents win per provider/model key.
    pub fn merge(&mut self, other: ConfigDocument) {
        if other.gateway.is_some() {
            self.gateway = other.gateway;
        }
        if other.server.is_some() {
            self.server = other.server;
        }
        if other.provider_order.is_some() {
            self.provider_order = other.provider_order;
        }
        if other.default_model.is_some() {
            self.default_model = other.default_model;
        }
        self.model_keys.merge(other.model_keys);
        self.provider_keys_configs.merge(other.provider_keys_configs);
        self.provider_config.merge(other.provider_config);
        self.model_routes.merge(other.model_routes);
        self.custom_model_routes.merge(other.custom_model_routes);
    }

    pub fn server(&self) -> ServerSettings {
        self.server.clone().unwrap_or_default()
    }

    pub fn gateway(&self) -> GatewaySettings {
        self.gateway.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordered_map_keeps_declaration_order() {
        let map: OrderedMap<String> =
            serde_yml::from_str("zeta: a\nalpha: b\nmid: c\n").unwrap();
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_ordered_map_last_insert_wins_in_place() {
        let mut map = OrderedMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        map.insert("a".to_string(), 3);
        assert_eq!(map.get("a"), Some(&3));
        assert_eq!(map.keys().next().map(String::as_str), Some("a"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_parse_full_document() {
        let yaml = r#"
gateway:
  max_retries: 2
  retry_delay_ms: 100
server:
  port: 9000
model_keys:
  deepseek:
    key1:
      DEEPSEEK_API_KEY: DEEPSEEK_KEY_A
provider_keys_configs:
  deepseek:
    env_mapping:
      DEEPSEEK_API_KEY: api_key
provider_config:
  fast-model: deepseek
model_routes:
  deepseek:
    fast-model: deepseek-chat
custom_model_routes:
  lab:
    api_key: LAB_KEY
    base_url: https://lab.example/v1
    lab-model: lab-model-v1
"#;
        let doc = ConfigDocument::from_yaml(yaml).unwrap();
        let gateway = doc.gateway();
        assert_eq!(gateway.max_retries, 2);
        assert_eq!(gateway.retry_delay_ms, 100);
        assert_eq!(gateway.timeout_secs, 30);
        assert_eq!(doc.server().port, 9000);
        assert_eq!(doc.server().host, "0.0.0.0");
        assert_eq!(
            doc.model_keys
                .get("deepseek")
                .and_then(|slots| slots.get("key1"))
                .and_then(|vars| vars.get("DEEPSEEK_API_KEY"))
                .map(String::as_str),
            Some("DEEPSEEK_KEY_A")
        );
        let lab = doc.custom_model_routes.get("lab").unwrap();
        assert_eq!(lab.models.get("lab-model").map(String::as_str), Some("lab-model-v1"));
    }

    #[test]
    fn test_empty_document_is_default() {
        let doc = ConfigDocument::from_yaml("  \n").unwrap();
        assert!(doc.provider_config.is_empty());
        assert!(doc.gateway.is_none());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = ConfigDocument::from_yaml("provider_config: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigValidationError::Parse(_)));
    }

    #[test]
    fn test_merge_later_document_wins() {
        let mut base = ConfigDocument::from_yaml(
            "provider_config:\n  m1: a\n  m2: a\nmodel_routes:\n  a:\n    m1: a-1\n",
        )
        .unwrap();
        let overlay =
            ConfigDocument::from_yaml("provider_config:\n  m2: b\ngateway:\n  max_retries: 0\n")
                .unwrap();
        base.merge(overlay);
        assert_eq!(base.provider_config.get("m1").map(String::as_str), Some("a"));
        assert_eq!(base.provider_config.get("m2").map(String::as_str), Some("b"));
        assert_eq!(base.gateway().max_retries, 0);
        assert!(base.model_routes.contains_key("a"));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = GatewaySettings::default();
        assert!(settings.validate().is_ok());

        settings.backoff_multiplier = 0.5;
        assert!(settings.validate().is_err());

        settings.backoff_multiplier = 2.0;
        settings.timeout_secs = 0;
        assert!(settings.validate().is_err());
    }
}
