//! Gateway Error Types
//!
//! Error taxonomy for routing, credential rotation, configuration and
//! upstream calls, plus the HTTP mapping used by the server surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// A configuration document violated an invariant.
///
/// Every variant names the specific rule that failed so the caller of a
/// reload can fix the document without guessing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(String),

    #[error("no configuration file found (searched: {0})")]
    NotFound(String),

    #[error("model '{model}' references unknown provider '{provider}'")]
    UnknownProvider { model: String, provider: String },

    #[error("provider '{provider}' has no credential slots in model_keys")]
    EmptyCredentialPool { provider: String },

    #[error("model '{model}' is assigned to provider '{provider}' but has no backend model in its route table")]
    MissingModelRoute { model: String, provider: String },

    #[error("provider '{provider}' has no base URL: not a built-in provider and no base_url configured")]
    MissingBaseUrl { provider: String },

    #[error("credential slot '{slot}' of provider '{provider}' is invalid: {reason}")]
    InvalidSlot {
        provider: String,
        slot: String,
        reason: String,
    },

    #[error("custom provider '{provider}' is invalid: {reason}")]
    InvalidCustomProvider { provider: String, reason: String },

    #[error("provider_order lists unknown provider '{0}'")]
    UnknownOrderedProvider(String),

    #[error("default_model '{0}' is not a routable model")]
    InvalidDefaultModel(String),

    #[error("invalid gateway settings: {0}")]
    Settings(String),
}

/// Failure reported by a [`ProviderClient`](crate::client::ProviderClient).
///
/// Transport failures are kept apart from HTTP-status failures so the
/// dispatcher can decide what is worth retrying.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode upstream response: {0}")]
    Decode(String),

    #[error("upstream stream failed: {0}")]
    Stream(String),

    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

impl UpstreamError {
    /// Timeouts, connection failures and 5xx/408/429 statuses.
    pub fn is_transient(&self) -> bool {
        match self {
            UpstreamError::Timeout(_) | UpstreamError::Connect(_) | UpstreamError::Stream(_) => {
                true
            }
            UpstreamError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
            UpstreamError::Decode(_) | UpstreamError::InvalidRequest(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout(err.to_string())
        } else if err.is_connect() {
            UpstreamError::Connect(err.to_string())
        } else if err.is_decode() {
            UpstreamError::Decode(err.to_string())
        } else if err.is_body() {
            UpstreamError::Stream(err.to_string())
        } else if err.is_builder() {
            UpstreamError::InvalidRequest(err.to_string())
        } else {
            UpstreamError::Connect(err.to_string())
        }
    }
}

impl From<serde_json::Error> for UpstreamError {
    fn from(err: serde_json::Error) -> Self {
        UpstreamError::Decode(err.to_string())
    }
}

/// Main error type for gateway operations
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Requested model is absent from every routing table
    #[error("model '{model}' is not supported or not configured")]
    UnknownModel { model: String },

    /// Model is claimed routable but its provider has no backend target for it
    #[error("model '{model}' is assigned to provider '{provider}' but has no backend route")]
    RouteNotConfigured { model: String, provider: String },

    /// The selected slot has no usable secret at call time
    #[error("credential slot '{slot}' of provider '{provider}' is unavailable: environment variable '{variable}' is not set")]
    CredentialUnavailable {
        provider: String,
        slot: String,
        variable: String,
    },

    #[error("configuration error: {0}")]
    ConfigValidation(#[from] ConfigValidationError),

    /// The inbound request is malformed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient upstream failures outlasted the retry budget
    #[error("provider '{provider}' failed after {attempts} attempt(s): {source}")]
    UpstreamExhausted {
        provider: String,
        attempts: u32,
        #[source]
        source: UpstreamError,
    },

    /// Upstream refused the request in a way retrying cannot fix
    #[error("provider '{provider}' rejected the request: {source}")]
    UpstreamRejected {
        provider: String,
        #[source]
        source: UpstreamError,
    },

    /// A stream failed after chunks had already reached the client
    #[error("stream from provider '{provider}' interrupted after {delivered} chunk(s): {source}")]
    StreamInterrupted {
        provider: String,
        delivered: usize,
        #[source]
        source: UpstreamError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status reported to the client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::UnknownModel { .. } | GatewayError::InvalidRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::RouteNotConfigured { .. }
            | GatewayError::CredentialUnavailable { .. }
            | GatewayError::ConfigValidation(_)
            | GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::UpstreamExhausted { source, .. } => match source {
                UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            GatewayError::UpstreamRejected { source, .. } => match source {
                UpstreamError::Status { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                _ => StatusCode::BAD_GATEWAY,
            },
            GatewayError::StreamInterrupted { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::UnknownModel { .. } => "MODEL_NOT_FOUND",
            GatewayError::RouteNotConfigured { .. } => "ROUTE_NOT_CONFIGURED",
            GatewayError::CredentialUnavailable { .. } => "CREDENTIAL_UNAVAILABLE",
            GatewayError::ConfigValidation(_) => "CONFIGURATION_ERROR",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::UpstreamExhausted { .. } => "UPSTREAM_ERROR",
            GatewayError::UpstreamRejected { .. } => "UPSTREAM_REJECTED",
            GatewayError::StreamInterrupted { .. } => "STREAM_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the client caused the failure.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// OpenAI-shaped error body.
    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_code(),
                "code": self.error_code(),
            }
        })
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
