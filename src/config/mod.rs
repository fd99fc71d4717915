//! Configuration Module
//!
//! Configuration document schema, validation into routing snapshots,
//! loading, and the snapshot store.

pub mod document;
pub mod loader;
pub mod provider;
pub mod routing;
pub mod store;

pub use document::{ConfigDocument, GatewaySettings, OrderedMap, ServerSettings};
pub use loader::{ConfigLoader, ConfigSource, CONFIG_PATH_ENV};
pub use provider::{builtin_base_url, CustomRouteConfig, KeyMappingConfig};
pub use routing::{CustomProvider, RoutingConfig};
pub use store::ConfigStore;
