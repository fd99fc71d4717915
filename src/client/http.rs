//! HTTP Provider Client
//!
//! OpenAI-compatible `/chat/completions` client built on reqwest.

use crate::client::sse::{SseDecoder, SseEvent};
use crate::client::{ChunkStream, ProviderClient, UpstreamCall};
use crate::error::UpstreamError;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Longest upstream error body kept in an error message
const MAX_ERROR_BODY: usize = 500;

/// HTTP client for OpenAI-compatible providers
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    /// Inner reqwest client
    client: Client,
}

impl HttpProviderClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self, UpstreamError> {
        // Per-attempt deadlines are enforced by the dispatcher.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| {
                UpstreamError::InvalidRequest(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    fn endpoint(call: &UpstreamCall<'_>) -> String {
        format!("{}/chat/completions", call.base_url.trim_end_matches('/'))
    }

    fn headers(call: &UpstreamCall<'_>, streaming: bool) -> Result<HeaderMap, UpstreamError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if streaming {
            headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        }

        if let Some(api_key) = call.credential.api_key() {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| {
                    UpstreamError::InvalidRequest(format!(
                        "credential slot '{}' holds an API key that is not a valid header value",
                        call.credential.slot
                    ))
                })?,
            );
        }

        Ok(headers)
    }

    async fn send(&self, call: &UpstreamCall<'_>, streaming: bool) -> Result<Response, UpstreamError> {
        let url = Self::endpoint(call);
        debug!(
            provider = call.provider,
            backend_model = call.backend_model,
            slot = %call.credential.slot,
            streaming,
            "sending upstream request"
        );

        let response = self
            .client
            .post(&url)
            .headers(Self::headers(call, streaming)?)
            .json(call.payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(UpstreamError::Status {
            status: status.as_u16(),
            body: truncate(&body),
        })
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    async fn complete(&self, call: &UpstreamCall<'_>) -> Result<Value, UpstreamError> {
        let response = self.send(call, false).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| {
            UpstreamError::Decode(format!("{}. Body: {}", e, truncate(&body)))
        })
    }

    async fn stream(&self, call: &UpstreamCall<'_>) -> Result<ChunkStream, UpstreamError> {
        use async_stream::stream;
        use futures::StreamExt;

        let response = self.send(call, true).await?;
        let mut byte_stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        let s = stream! {
            while let Some(bytes) = byte_stream.next().await {
                let bytes = match bytes {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        yield Err(UpstreamError::from(e));
                        return;
                    }
                };
                for event in decoder.push(&bytes) {
                    match event {
                        Ok(SseEvent::Data(chunk)) => yield Ok(chunk),
                        Ok(SseEvent::Done) => return,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            match decoder.finish() {
                Some(Ok(SseEvent::Data(chunk))) => yield Ok(chunk),
                Some(Err(e)) => yield Err(e),
                Some(Ok(SseEvent::Done)) | None => {}
            }
        };

        Ok(Box::pin(s))
    }
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::CredentialPool;
    use crate::router::CredentialSlot;
    use futures::StreamExt;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn credential(var: &str, value: &str) -> crate::router::Credential {
        std::env::set_var(var, value);
        CredentialPool::new(
            "mock",
            vec![CredentialSlot::api_key("key1", var)],
            BTreeMap::new(),
        )
        .next()
        .unwrap()
    }

    #[tokio::test]
    async fn test_client_creation() {
        let client = HttpProviderClient::new();
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_complete_sends_bearer_and_payload() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer http-test-key")
            .match_body(mockito::Matcher::PartialJson(json!({"model": "acme-fast-v2"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"cmpl-1","choices":[]}"#)
            .create_async()
            .await;

        let credential = credential("HTTP_TEST_KEY_OK", "http-test-key");
        let base_url = format!("{}/v1", server.url());
        let payload = json!({"model": "acme-fast-v2", "messages": []});
        let call = UpstreamCall {
            provider: "mock",
            base_url: &base_url,
            backend_model: "acme-fast-v2",
            credential: &credential,
            payload: &payload,
        };

        let body = HttpProviderClient::new().unwrap().complete(&call).await.unwrap();
        assert_eq!(body["id"], "cmpl-1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("upstream overloaded")
            .create_async()
            .await;

        let credential = credential("HTTP_TEST_KEY_503", "k");
        let base_url = server.url();
        let payload = json!({"model": "m"});
        let call = UpstreamCall {
            provider: "mock",
            base_url: &base_url,
            backend_model: "m",
            credential: &credential,
            payload: &payload,
        };

        let err = HttpProviderClient::new().unwrap().complete(&call).await.unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Status {
                status: 503,
                body: "upstream overloaded".to_string()
            }
        );
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_until_done() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(concat!(
                "data: {\"n\":1}\n\n",
                ": keep-alive\n\n",
                "data: {\"n\":2}\n\n",
                "data: [DONE]\n\n",
                "data: {\"n\":3}\n\n",
            ))
            .create_async()
            .await;

        let credential = credential("HTTP_TEST_KEY_STREAM", "k");
        let base_url = server.url();
        let payload = json!({"model": "m", "stream": true});
        let call = UpstreamCall {
            provider: "mock",
            base_url: &base_url,
            backend_model: "m",
            credential: &credential,
            payload: &payload,
        };

        let stream = HttpProviderClient::new().unwrap().stream(&call).await.unwrap();
        let chunks: Vec<_> = stream.collect().await;
        let chunks: Vec<_> = chunks.into_iter().map(Result::unwrap).collect();
        assert_eq!(chunks, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_truncate_long_bodies() {
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        let short = truncate(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short"), "short");
    }
}
