//! Configuration Reloading
//!
//! Validates a new document and swaps it into the store.

use crate::config::{ConfigLoader, ConfigSource, ConfigStore, RoutingConfig};
use crate::error::ConfigValidationError;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Applies configuration documents to a [`ConfigStore`]
///
/// Reloads run one at a time; requests keep whatever snapshot they already
/// hold.
pub struct ConfigReloader {
    store: Arc<ConfigStore>,

    /// Source the gateway started from, reread by [`ConfigReloader::reload_startup`]
    startup_source: Option<ConfigSource>,

    /// Serializes parse-validate-swap
    lock: Mutex<()>,
}

impl ConfigReloader {
    pub fn new(store: Arc<ConfigStore>, startup_source: Option<ConfigSource>) -> Self {
        Self {
            store,
            startup_source,
            lock: Mutex::new(()),
        }
    }

    /// Parse, validate and install `source`.
    pub fn reload(&self, source: &ConfigSource) -> Result<Arc<RoutingConfig>, ConfigValidationError> {
        let _guard = self.lock.lock();

        let installed = ConfigLoader::from_source(source)
            .and_then(|loader| loader.build())
            .and_then(|config| self.store.replace(config));

        match installed {
            Ok(snapshot) => {
                info!(
                    generation = snapshot.generation(),
                    source = %describe(source),
                    "configuration reloaded"
                );
                Ok(snapshot)
            }
            Err(err) => {
                warn!(
                    source = %describe(source),
                    error = %err,
                    "configuration reload rejected; previous snapshot stays active"
                );
                Err(err)
            }
        }
    }

    /// Reread the startup source, ignoring any document applied since.
    pub fn reload_startup(&self) -> Result<Arc<RoutingConfig>, ConfigValidationError> {
        let source = self.startup_source.as_ref().ok_or_else(|| {
            ConfigValidationError::NotFound("no startup configuration source".to_string())
        })?;
        self.reload(source)
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }
}

fn describe(source: &ConfigSource) -> String {
    match source {
        ConfigSource::Paths(paths) => paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(","),
        ConfigSource::Inline(text) => format!("inline ({} bytes)", text.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::routing::tests::{acme_config, ACME_YAML};
    use crate::router::ModelResolver;
    use std::io::Write;
    use std::thread;
    use tempfile::NamedTempFile;

    fn reloader() -> ConfigReloader {
        ConfigReloader::new(Arc::new(ConfigStore::new(acme_config())), None)
    }

    #[test]
    fn test_reload_installs_new_routes() {
        let reloader = reloader();
        let yaml = ACME_YAML.replace("acme-fast-v2", "acme-fast-v3");
        reloader.reload(&ConfigSource::inline(yaml)).unwrap();

        let snapshot = reloader.store().current();
        let route = ModelResolver::new(&snapshot).resolve("fast-model").unwrap();
        assert_eq!(route.backend_model, "acme-fast-v3");
        assert_eq!(snapshot.generation(), 2);
    }

    #[test]
    fn test_rejected_reload_leaves_resolution_unchanged() {
        let reloader = reloader();
        let before = reloader.store().current();
        let resolve_before = ModelResolver::new(&before).resolve("fast-model").unwrap();

        let dangling = ACME_YAML.replace(
            "provider_config:\n  fast-model: acme",
            "provider_config:\n  fast-model: acme\n  ghost-model: nowhere",
        );
        let err = reloader.reload(&ConfigSource::inline(dangling)).unwrap_err();
        assert!(matches!(err, ConfigValidationError::UnknownProvider { .. }));

        let no_keys = ACME_YAML.replace(
            "model_keys:\n  acme:\n    slotA:\n      ACME_API_KEY: ROUTING_TEST_ACME_A\n    slotB:\n      ACME_API_KEY: ROUTING_TEST_ACME_B\n",
            "",
        );
        let err = reloader.reload(&ConfigSource::inline(no_keys)).unwrap_err();
        assert!(matches!(err, ConfigValidationError::EmptyCredentialPool { .. }));

        let after = reloader.store().current();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(
            ModelResolver::new(&after).resolve("fast-model").unwrap(),
            resolve_before
        );
        assert!(ModelResolver::new(&after).resolve("ghost-model").is_err());
    }

    #[test]
    fn test_reload_is_idempotent() {
        let reloader = reloader();
        let first = reloader.reload(&ConfigSource::inline(ACME_YAML)).unwrap();
        let second = reloader.reload(&ConfigSource::inline(ACME_YAML)).unwrap();

        assert_eq!(first.model_assignments(), second.model_assignments());
        assert_eq!(first.provider_order(), second.provider_order());
        assert_eq!(first.settings(), second.settings());
        for model in first.model_names() {
            assert_eq!(
                ModelResolver::new(&first).resolve(model).unwrap(),
                ModelResolver::new(&second).resolve(model).unwrap()
            );
        }
    }

    #[test]
    fn test_reload_startup_without_source_fails() {
        let reloader = reloader();
        let err = reloader.reload_startup().unwrap_err();
        assert!(matches!(err, ConfigValidationError::NotFound(_)));
        assert_eq!(reloader.store().current().generation(), 1);
    }

    #[test]
    fn test_reload_startup_rereads_file_after_inline_reload() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", ACME_YAML).unwrap();
        let reloader = ConfigReloader::new(
            Arc::new(ConfigStore::new(acme_config())),
            Some(ConfigSource::path(file.path())),
        );

        let inline = ACME_YAML.replace("acme-fast-v2", "acme-fast-inline");
        reloader.reload(&ConfigSource::inline(inline)).unwrap();

        std::fs::write(file.path(), ACME_YAML.replace("acme-fast-v2", "acme-fast-v9")).unwrap();
        let snapshot = reloader.reload_startup().unwrap();
        assert_eq!(
            ModelResolver::new(&snapshot)
                .resolve("fast-model")
                .unwrap()
                .backend_model,
            "acme-fast-v9"
        );
    }

    #[test]
    fn test_concurrent_reloads_are_serialized() {
        let reloader = Arc::new(reloader());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let reloader = Arc::clone(&reloader);
                thread::spawn(move || {
                    let yaml = ACME_YAML.replace("acme-fast-v2", &format!("acme-fast-{}", i));
                    reloader.reload(&ConfigSource::inline(yaml)).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = reloader.store().current();
        assert_eq!(snapshot.generation(), 9);
        let backend = ModelResolver::new(&snapshot)
            .resolve("fast-model")
            .unwrap()
            .backend_model;
        assert!(backend.starts_with("acme-fast-"));
    }
}
