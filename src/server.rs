//! HTTP Surface
//!
//! OpenAI-compatible endpoints plus the admin routes, on axum.

use crate::api::{ChatRequest, ReloadRequest};
use crate::config::ConfigSource;
use crate::dispatch::DispatchOutcome;
use crate::error::GatewayError;
use crate::Gateway;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::{stream, StreamExt};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router.
pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/models", get(list_models))
        .route("/admin/reload", post(reload))
        .route("/admin/providers", get(providers))
        .route("/health", get(health))
        .layer(middleware::from_fn(request_id))
        .with_state(gateway)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    gateway: Arc<Gateway>,
    addr: &str,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(gateway))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Reads `X-Request-ID` or generates one, scopes a span to the request and
/// echoes the id on the response.
async fn request_id(request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let span = info_span!(
        "request",
        request_id = %id,
        method = %request.method(),
        path = %request.uri().path()
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn chat_completions(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let request = match parse_chat_request(&body) {
        Ok(request) => request,
        Err(err) => return error_response(err),
    };

    match gateway.dispatch(request).await {
        Ok(DispatchOutcome::Complete(completion)) => Json(completion.body).into_response(),
        Ok(DispatchOutcome::Stream(relay)) => {
            let events = relay
                .map(|item| match item {
                    Ok(chunk) => sse_event(&chunk),
                    Err(err) => sse_event(&err.to_body()),
                })
                .chain(stream::once(async { Bytes::from_static(b"data: [DONE]\n\n") }))
                .map(Ok::<_, Infallible>);

            let mut response = Response::new(Body::from_stream(events));
            let headers = response.headers_mut();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
            headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            response
        }
        Err(err) => error_response(err),
    }
}

fn parse_chat_request(body: &[u8]) -> Result<ChatRequest, GatewayError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("body is not valid JSON: {}", e)))?;
    ChatRequest::from_value(value)
}

fn sse_event(data: &Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", data))
}

async fn list_models(State(gateway): State<Arc<Gateway>>) -> Response {
    Json(gateway.models()).into_response()
}

async fn providers(State(gateway): State<Arc<Gateway>>) -> Response {
    let snapshot = gateway.snapshot();
    Json(json!({
        "generation": snapshot.generation(),
        "loaded_at": snapshot.loaded_at(),
        "providers": gateway.provider_status(),
    }))
    .into_response()
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    Json(json!({
        "status": "ok",
        "generation": gateway.snapshot().generation(),
    }))
    .into_response()
}

async fn reload(State(gateway): State<Arc<Gateway>>, body: Bytes) -> Response {
    let source = match reload_source(&body) {
        Ok(source) => source,
        Err(err) => return error_response(err),
    };

    // Reading files and validating is blocking work.
    let result = tokio::task::spawn_blocking(move || gateway.reload(source)).await;
    match result {
        Ok(Ok(summary)) => Json(summary).into_response(),
        Ok(Err(err @ GatewayError::ConfigValidation(_))) => {
            warn!(error = %err, "reload rejected");
            (StatusCode::UNPROCESSABLE_ENTITY, Json(err.to_body())).into_response()
        }
        Ok(Err(err)) => error_response(err),
        Err(join_error) => error_response(GatewayError::Internal(format!(
            "reload task failed: {}",
            join_error
        ))),
    }
}

fn reload_source(body: &[u8]) -> Result<Option<ConfigSource>, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: ReloadRequest = serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("invalid reload body: {}", e)))?;

    match (request.path, request.inline) {
        (Some(_), Some(_)) => Err(GatewayError::InvalidRequest(
            "give either 'path' or 'inline', not both".to_string(),
        )),
        (Some(path), None) => Ok(Some(ConfigSource::path(path))),
        (None, Some(inline)) => Ok(Some(ConfigSource::inline(inline))),
        (None, None) => Ok(None),
    }
}

fn error_response(err: GatewayError) -> Response {
    if err.is_client_error() {
        warn!(code = err.error_code(), error = %err, "request failed");
    } else {
        error!(code = err.error_code(), error = %err, "request failed");
    }
    err.into_response()
}
