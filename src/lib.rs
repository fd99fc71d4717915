//! LLM Gateway - OpenAI-compatible model routing
//!
//! Routes chat completion requests to upstream providers by model name,
//! rotates API keys per provider, retries transient failures, relays
//! streamed responses, and hot-reloads its routing configuration.

use std::sync::Arc;

pub mod api;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod router;
pub mod server;

use api::{ChatRequest, ModelList, ProviderStatus, ReloadSummary};
use client::{HttpProviderClient, ProviderClient};
use config::{ConfigLoader, ConfigSource, ConfigStore, RoutingConfig, ServerSettings};
use dispatch::{DispatchOutcome, RequestDispatcher};
use error::{GatewayError, Result};
use router::{ConfigReloader, ModelResolver, ModelRoute};
use tracing::info;

/// The gateway core
pub struct Gateway {
    store: Arc<ConfigStore>,
    reloader: ConfigReloader,
    dispatcher: RequestDispatcher,

    /// Listener settings from the startup document
    server: ServerSettings,
}

impl Gateway {
    /// Create a gateway from the first configuration file found
    pub fn new() -> Result<Self> {
        let loader = ConfigLoader::discover()?;
        let source = ConfigSource::Paths(loader.loaded_paths().to_vec());
        Self::from_loader(loader, source, default_client()?)
    }

    /// Create a gateway from an explicit source
    pub fn from_source(source: ConfigSource) -> Result<Self> {
        Self::with_client(source, default_client()?)
    }

    /// Create a gateway that calls providers through `client`
    pub fn with_client(source: ConfigSource, client: Arc<dyn ProviderClient>) -> Result<Self> {
        let loader = ConfigLoader::from_source(&source)?;
        Self::from_loader(loader, source, client)
    }

    fn from_loader(
        loader: ConfigLoader,
        source: ConfigSource,
        client: Arc<dyn ProviderClient>,
    ) -> Result<Self> {
        let config = loader.build()?;
        let server = loader.document().server();
        let store = Arc::new(ConfigStore::new(config));

        let snapshot = store.current();
        info!(
            providers = snapshot.provider_order().len(),
            models = snapshot.model_names().len(),
            "gateway configured"
        );

        Ok(Self {
            reloader: ConfigReloader::new(Arc::clone(&store), Some(source)),
            dispatcher: RequestDispatcher::new(Arc::clone(&store), client),
            store,
            server,
        })
    }

    /// Resolve a client model name against the current snapshot.
    pub fn resolve(&self, model: &str) -> Result<ModelRoute> {
        ModelResolver::new(&self.store.current()).resolve(model)
    }

    /// Route one chat completion request.
    pub async fn dispatch(&self, request: ChatRequest) -> Result<DispatchOutcome> {
        self.dispatcher.dispatch_request(request).await
    }

    /// Install a new configuration; `None` rereads the startup source.
    ///
    /// On failure the previous snapshot stays active.
    pub fn reload(&self, source: Option<ConfigSource>) -> Result<ReloadSummary> {
        let snapshot = match source {
            Some(source) => self.reloader.reload(&source)?,
            None => self.reloader.reload_startup()?,
        };
        Ok(ReloadSummary::from_config(&snapshot))
    }

    /// Routable models, OpenAI list shape.
    pub fn models(&self) -> ModelList {
        ModelList::from_config(&self.store.current())
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        ProviderStatus::from_config(&self.store.current())
    }

    /// The snapshot requests are currently served from.
    pub fn snapshot(&self) -> Arc<RoutingConfig> {
        self.store.current()
    }

    pub fn server_settings(&self) -> &ServerSettings {
        &self.server
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("store", &self.store)
            .field("server", &self.server)
            .finish()
    }
}

fn default_client() -> Result<Arc<dyn ProviderClient>> {
    let client = HttpProviderClient::new()
        .map_err(|e| GatewayError::Internal(format!("failed to initialise HTTP client: {}", e)))?;
    Ok(Arc::new(client))
}
