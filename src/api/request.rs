//! Chat Completion Request
//!
//! The inbound envelope. Only `model` and `stream` are interpreted; every
//! other field is forwarded verbatim.

use crate::error::{GatewayError, Result};
use serde_json::{Map, Value};

/// Inbound chat completion request
///
/// Holds the body as received so the forwarded payload keeps the caller's
/// field order.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Client-visible model name; `default_model` applies when absent
    model: Option<String>,

    /// Whether to stream the response
    stream: Option<bool>,

    body: Map<String, Value>,
}

impl ChatRequest {
    /// Create a new request
    pub fn new(model: impl Into<String>, messages: Value) -> Self {
        let model = model.into();
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(model.clone()));
        body.insert("messages".to_string(), messages);
        Self {
            model: Some(model),
            stream: None,
            body,
        }
    }

    /// Parse a JSON body.
    pub fn from_value(body: Value) -> Result<Self> {
        let Value::Object(body) = body else {
            return Err(GatewayError::InvalidRequest(
                "request body must be a JSON object".to_string(),
            ));
        };

        let model = match body.get("model") {
            None | Some(Value::Null) => None,
            Some(Value::String(model)) => Some(model.clone()),
            Some(_) => {
                return Err(GatewayError::InvalidRequest(
                    "'model' must be a string".to_string(),
                ))
            }
        };
        let stream = match body.get("stream") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(stream)) => Some(*stream),
            Some(_) => {
                return Err(GatewayError::InvalidRequest(
                    "'stream' must be a boolean".to_string(),
                ))
            }
        };
        match body.get("messages") {
            None => {
                return Err(GatewayError::InvalidRequest(
                    "missing field 'messages'".to_string(),
                ))
            }
            Some(Value::Null) => {
                return Err(GatewayError::InvalidRequest(
                    "'messages' must not be null".to_string(),
                ))
            }
            Some(_) => {}
        }

        Ok(Self {
            model,
            stream,
            body,
        })
    }

    /// Enable streaming
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self.body.insert("stream".to_string(), Value::Bool(stream));
        self
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }

    /// The requested model, falling back to `default_model`.
    pub fn model_or<'a>(&'a self, default_model: Option<&'a str>) -> Result<&'a str> {
        self.model
            .as_deref()
            .filter(|model| !model.is_empty())
            .or(default_model)
            .ok_or_else(|| {
                GatewayError::InvalidRequest(
                    "'model' is required when no default_model is configured".to_string(),
                )
            })
    }

    /// The body to forward upstream, fields in the order received.
    pub fn into_payload(self) -> Value {
        Value::Object(self.body)
    }
}
