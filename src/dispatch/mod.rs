//! Dispatch Module
//!
//! Orchestrates one inbound call: resolve the model, pick a credential,
//! invoke the provider under the retry policy, relay the result.

pub mod relay;
pub mod retry;

pub use relay::RelayStream;
pub use retry::{RetryPolicy, RetryState};

use crate::api::ChatRequest;
use crate::client::{ProviderClient, UpstreamCall};
use crate::config::{ConfigStore, RoutingConfig};
use crate::error::{ConfigValidationError, GatewayError, Result, UpstreamError};
use crate::router::{Credential, CredentialPool, ModelResolver, ModelRoute};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A buffered upstream response
#[derive(Debug, Clone)]
pub struct Completion {
    /// Response body exactly as the provider sent it
    pub body: Value,
    pub provider: String,
    pub backend_model: String,

    /// Slot that served the successful attempt
    pub slot: String,

    /// Attempts used, including the successful one
    ///
    /// A slot skipped because its secret was missing uses an attempt without
    /// a network call.
    pub attempts: u32,
}

/// Result of a successful dispatch
pub enum DispatchOutcome {
    Complete(Completion),
    Stream(RelayStream),
}

impl std::fmt::Debug for DispatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchOutcome::Complete(completion) => {
                f.debug_tuple("Complete").field(completion).finish()
            }
            DispatchOutcome::Stream(stream) => f
                .debug_struct("Stream")
                .field("provider", &stream.provider())
                .field("slot", &stream.slot())
                .finish(),
        }
    }
}

/// Routes requests to providers
///
/// Each dispatch reads the configuration snapshot exactly once, so a reload
/// that lands mid-request never changes its route, credentials or retry
/// policy.
pub struct RequestDispatcher {
    store: Arc<ConfigStore>,
    client: Arc<dyn ProviderClient>,
}

impl RequestDispatcher {
    pub fn new(store: Arc<ConfigStore>, client: Arc<dyn ProviderClient>) -> Self {
        Self { store, client }
    }

    /// Dispatch one request for `model`.
    pub async fn dispatch(&self, model: &str, payload: Value, stream: bool) -> Result<DispatchOutcome> {
        let snapshot = self.store.current();
        self.dispatch_on(&snapshot, model, payload, stream).await
    }

    /// Dispatch an inbound request; `default_model` applies when it names
    /// no model.
    pub async fn dispatch_request(&self, request: ChatRequest) -> Result<DispatchOutcome> {
        let snapshot = self.store.current();
        let model = request.model_or(snapshot.default_model())?.to_string();
        let stream = request.is_stream();
        let payload = request.into_payload();
        self.dispatch_on(&snapshot, &model, payload, stream).await
    }

    async fn dispatch_on(
        &self,
        snapshot: &RoutingConfig,
        model: &str,
        payload: Value,
        stream: bool,
    ) -> Result<DispatchOutcome> {
        let route = ModelResolver::new(snapshot).resolve(model)?;
        let base_url = snapshot
            .base_url(&route.provider)
            .ok_or_else(|| ConfigValidationError::MissingBaseUrl {
                provider: route.provider.clone(),
            })?;
        let payload = prepare_payload(payload, &route.backend_model, stream)?;
        let policy = RetryPolicy::from_settings(snapshot.settings());

        debug!(
            model,
            provider = %route.provider,
            backend_model = %route.backend_model,
            stream,
            generation = snapshot.generation(),
            "dispatching request"
        );

        let target = Target {
            snapshot,
            route: &route,
            base_url,
            payload: &payload,
        };

        if stream {
            self.open_stream(&target, &policy)
                .await
                .map(DispatchOutcome::Stream)
        } else {
            self.complete_with_retry(&target, &policy)
                .await
                .map(DispatchOutcome::Complete)
        }
    }

    async fn complete_with_retry(&self, target: &Target<'_>, policy: &RetryPolicy) -> Result<Completion> {
        let provider = target.route.provider.as_str();
        let mut state = RetryState::new(policy);

        loop {
            let attempt = state.begin_attempt();
            let credential = match target.snapshot.next_credential(provider) {
                Ok(credential) => credential,
                Err(err) if self.can_rotate_past(target.snapshot, provider, &state, &err) => {
                    warn!(provider, attempt, error = %err, "credential slot unavailable, rotating");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let call = target.call(&credential);
            let result = match tokio::time::timeout(policy.attempt_timeout, self.client.complete(&call)).await {
                Ok(result) => result,
                Err(_) => Err(attempt_timed_out(policy)),
            };

            match result {
                Ok(body) => {
                    if let Some(usage) = body.get("usage").filter(|u| !u.is_null()) {
                        relay::log_usage(provider, &target.route.backend_model, usage);
                    }
                    debug!(provider, slot = %credential.slot, attempt, "upstream call succeeded");
                    return Ok(Completion {
                        body,
                        provider: provider.to_string(),
                        backend_model: target.route.backend_model.clone(),
                        slot: credential.slot,
                        attempts: attempt,
                    });
                }
                Err(err) if !err.is_transient() => {
                    warn!(provider, slot = %credential.slot, attempt, error = %err, "upstream rejected request");
                    return Err(GatewayError::UpstreamRejected {
                        provider: provider.to_string(),
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(
                        provider,
                        slot = %credential.slot,
                        attempt,
                        max_attempts = policy.max_attempts(),
                        error = %err,
                        "transient upstream failure"
                    );
                    state.record_failure(err);
                    if !state.has_attempts_left() {
                        break;
                    }
                    let delay = state.next_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let source = state
            .take_last_error()
            .unwrap_or_else(|| UpstreamError::Connect("no upstream attempt completed".to_string()));
        Err(GatewayError::UpstreamExhausted {
            provider: provider.to_string(),
            attempts: state.attempts(),
            source,
        })
    }

    async fn open_stream(&self, target: &Target<'_>, policy: &RetryPolicy) -> Result<RelayStream> {
        let provider = target.route.provider.as_str();
        let credential = target.snapshot.next_credential(provider)?;
        let call = target.call(&credential);

        let opened = match tokio::time::timeout(policy.attempt_timeout, self.client.stream(&call)).await {
            Ok(result) => result,
            Err(_) => Err(attempt_timed_out(policy)),
        };

        match opened {
            Ok(chunks) => {
                info!(
                    provider,
                    backend_model = %target.route.backend_model,
                    slot = %credential.slot,
                    "upstream stream opened"
                );
                Ok(RelayStream::new(
                    chunks,
                    provider,
                    target.route.backend_model.as_str(),
                    credential.slot,
                    policy.attempt_timeout,
                ))
            }
            Err(err) if err.is_transient() => Err(GatewayError::UpstreamExhausted {
                provider: provider.to_string(),
                attempts: 1,
                source: err,
            }),
            Err(err) => Err(GatewayError::UpstreamRejected {
                provider: provider.to_string(),
                source: err,
            }),
        }
    }

    /// Whether an unavailable slot can be skipped in favour of the next one.
    fn can_rotate_past(
        &self,
        snapshot: &RoutingConfig,
        provider: &str,
        state: &RetryState,
        err: &GatewayError,
    ) -> bool {
        matches!(err, GatewayError::CredentialUnavailable { .. })
            && snapshot.pool(provider).map_or(0, CredentialPool::len) > 1
            && state.has_attempts_left()
    }
}

/// Everything fixed for the lifetime of one dispatch
struct Target<'a> {
    snapshot: &'a RoutingConfig,
    route: &'a ModelRoute,
    base_url: &'a str,
    payload: &'a Value,
}

impl Target<'_> {
    fn call<'c>(&'c self, credential: &'c Credential) -> UpstreamCall<'c> {
        UpstreamCall {
            provider: &self.route.provider,
            // A slot may carry its own endpoint.
            base_url: credential.api_base().unwrap_or(self.base_url),
            backend_model: &self.route.backend_model,
            credential,
            payload: self.payload,
        }
    }
}

fn attempt_timed_out(policy: &RetryPolicy) -> UpstreamError {
    UpstreamError::Timeout(format!(
        "no response within {}s",
        policy.attempt_timeout.as_secs_f64()
    ))
}

/// Rewrite `model` to the backend id and set the stream flags.
pub fn prepare_payload(mut payload: Value, backend_model: &str, stream: bool) -> Result<Value> {
    let body = payload
        .as_object_mut()
        .ok_or_else(|| GatewayError::InvalidRequest("request body must be a JSON object".to_string()))?;

    body.insert("model".to_string(), Value::String(backend_model.to_string()));

    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
        body.entry("stream_options")
            .or_insert_with(|| json!({ "include_usage": true }));
    } else if body.contains_key("stream") {
        body.insert("stream".to_string(), Value::Bool(false));
    }

    Ok(payload)
}
