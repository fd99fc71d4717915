//! Configuration Store
//!
//! Holds the current routing snapshot behind an atomic pointer.

use crate::config::routing::RoutingConfig;
use crate::error::ConfigValidationError;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

/// Single authoritative holder of the routing snapshot
///
/// Readers load the pointer without locking. Writers are serialized among
/// themselves so generation numbers and cursor hand-over never interleave.
pub struct ConfigStore {
    current: ArcSwap<RoutingConfig>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    pub fn new(mut initial: RoutingConfig) -> Self {
        initial.generation = 1;
        Self {
            current: ArcSwap::from_pointee(initial),
            write_lock: Mutex::new(()),
        }
    }

    /// The latest committed snapshot.
    pub fn current(&self) -> Arc<RoutingConfig> {
        self.current.load_full()
    }

    /// Install `next` as the current snapshot.
    ///
    /// On error the previous snapshot stays in effect untouched.
    pub fn replace(
        &self,
        mut next: RoutingConfig,
    ) -> Result<Arc<RoutingConfig>, ConfigValidationError> {
        next.validate()?;

        let _guard = self.write_lock.lock();
        let previous = self.current.load();
        next.generation = previous.generation + 1;
        next.inherit_rotation(&previous);

        let next = Arc::new(next);
        self.current.store(Arc::clone(&next));

        info!(
            generation = next.generation,
            models = next.model_names().len(),
            providers = next.provider_order().len(),
            "routing configuration installed"
        );
        Ok(next)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current.load();
        f.debug_struct("ConfigStore")
            .field("generation", &current.generation)
            .field("models", &current.model_names().len())
            .finish()
    }
}
