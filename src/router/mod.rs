//! Router Module
//!
//! Model resolution, credential rotation and configuration reloading.

pub mod key_rotator;
pub mod reloader;
pub mod resolver;

pub use key_rotator::{Credential, CredentialPool, CredentialSlot, KeyRotator, SlotVariable};
pub use reloader::ConfigReloader;
pub use resolver::{ModelResolver, ModelRoute};
