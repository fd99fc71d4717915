//! API Module
//!
//! Inbound request envelope and the listing/admin response types.

pub mod models;
pub mod request;

pub use models::{ModelCard, ModelList, ProviderStatus, ReloadRequest, ReloadSummary};
pub use request::ChatRequest;
