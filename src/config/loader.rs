//! Configuration Loader
//!
//! Reads configuration documents from files or inline text and layers them.

use crate::config::document::ConfigDocument;
use crate::config::routing::RoutingConfig;
use crate::error::ConfigValidationError;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "LLM_GATEWAY_CONFIG";

/// Where a configuration document comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// One or more files, merged in order (later files win)
    Paths(Vec<PathBuf>),

    /// A document passed as text
    Inline(String),
}

impl ConfigSource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        ConfigSource::Paths(vec![path.into()])
    }

    pub fn inline(document: impl Into<String>) -> Self {
        ConfigSource::Inline(document.into())
    }
}

/// Configuration loader with support for layered sources
pub struct ConfigLoader {
    document: ConfigDocument,
    loaded: Vec<PathBuf>,
}

impl ConfigLoader {
    fn empty() -> Self {
        Self {
            document: ConfigDocument::default(),
            loaded: Vec::new(),
        }
    }

    /// Load from the first default location that exists
    pub fn discover() -> Result<Self, ConfigValidationError> {
        let candidates = Self::get_config_paths();
        match candidates.iter().find(|path| path.exists()) {
            Some(path) => Self::from_path(path),
            None => Err(ConfigValidationError::NotFound(
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigValidationError> {
        let mut loader = Self::empty();
        loader.load_from_file(path)?;
        Ok(loader)
    }

    /// Load from any source
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigValidationError> {
        let mut loader = Self::empty();
        match source {
            ConfigSource::Paths(paths) => {
                for path in paths {
                    loader.load_from_file(path)?;
                }
            }
            ConfigSource::Inline(text) => {
                loader.merge_document(ConfigDocument::from_yaml(text)?);
            }
        }
        Ok(loader)
    }

    /// Get list of config paths to check
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        // 1. Environment variable
        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        // 2. Current directory
        paths.push(PathBuf::from("gateway.yaml"));
        paths.push(PathBuf::from("config").join("gateway.yaml"));

        // 3. User config directory
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llm-gateway").join("gateway.yaml"));
        }

        // 4. Home directory
        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llm-gateway").join("gateway.yaml"));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigValidationError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigValidationError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let document = ConfigDocument::from_yaml(&content).map_err(|e| match e {
            ConfigValidationError::Parse(reason) => {
                ConfigValidationError::Parse(format!("{}: {}", path.display(), reason))
            }
            other => other,
        })?;

        debug!(path = %path.display(), "configuration file loaded");
        self.merge_document(document);
        self.loaded.push(path.to_path_buf());
        Ok(())
    }

    /// Merge another document into this one (later documents override earlier)
    fn merge_document(&mut self, other: ConfigDocument) {
        self.document.merge(other);
    }

    /// Files read so far, in load order
    pub fn loaded_paths(&self) -> &[PathBuf] {
        &self.loaded
    }

    pub fn document(&self) -> &ConfigDocument {
        &self.document
    }

    /// Validate the merged document into a routing snapshot
    pub fn build(&self) -> Result<RoutingConfig, ConfigValidationError> {
        RoutingConfig::from_document(&self.document)
    }
}
