//! Client Module
//!
//! The upstream call capability the dispatcher depends on, and its
//! OpenAI-compatible HTTP implementation.

pub mod http;
pub mod sse;

pub use http::HttpProviderClient;
pub use sse::{parse_sse_line, SseDecoder, SseEvent};

use crate::error::UpstreamError;
use crate::router::Credential;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;

/// Lazily produced response chunks from one upstream stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<Value, UpstreamError>> + Send>>;

/// Everything needed for a single upstream attempt
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCall<'a> {
    pub provider: &'a str,
    pub base_url: &'a str,
    pub backend_model: &'a str,
    pub credential: &'a Credential,
    /// Request body with `model` already rewritten to `backend_model`
    pub payload: &'a Value,
}

/// Performs the wire-level exchange with a provider
///
/// Implementations report transport failures and non-success statuses as
/// distinct [`UpstreamError`] variants and never retry on their own.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Send a request and buffer the whole response.
    async fn complete(&self, call: &UpstreamCall<'_>) -> Result<Value, UpstreamError>;

    /// Open a streaming request; chunks arrive in upstream order.
    async fn stream(&self, call: &UpstreamCall<'_>) -> Result<ChunkStream, UpstreamError>;
}
