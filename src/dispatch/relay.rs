//! Streaming Relay
//!
//! Forwards upstream chunks in arrival order and turns the first upstream
//! failure, or an idle gap longer than the attempt timeout, into a single
//! terminal error item.

use crate::client::ChunkStream;
use crate::error::{GatewayError, UpstreamError};
use futures::Stream;
use pin_project_lite::pin_project;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{Instant, Sleep};
use tracing::{debug, info, warn};

pin_project! {
    /// Lazy, finite, non-restartable chunk sequence for one streamed request
    ///
    /// Yields `Ok` chunks, then at most one `Err`, then ends. Dropping it
    /// drops the upstream response body with it.
    pub struct RelayStream {
        inner: ChunkStream,
        #[pin]
        idle: Sleep,
        idle_timeout: Duration,
        provider: String,
        backend_model: String,
        slot: String,
        delivered: usize,
        usage: Option<Value>,
        finished: bool,
    }

    impl PinnedDrop for RelayStream {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if !*this.finished {
                debug!(
                    provider = %this.provider,
                    backend_model = %this.backend_model,
                    delivered = *this.delivered,
                    "stream dropped before completion; upstream released"
                );
            }
        }
    }
}

impl RelayStream {
    pub fn new(
        inner: ChunkStream,
        provider: impl Into<String>,
        backend_model: impl Into<String>,
        slot: impl Into<String>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            inner,
            idle: tokio::time::sleep(idle_timeout),
            idle_timeout,
            provider: provider.into(),
            backend_model: backend_model.into(),
            slot: slot.into(),
            delivered: 0,
            usage: None,
            finished: false,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Credential slot the stream was opened with.
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// Chunks handed to the consumer so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }
}

impl Stream for RelayStream {
    type Item = Result<Value, GatewayError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        if *this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.delivered += 1;
                if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
                    *this.usage = Some(usage.clone());
                }
                let deadline = Instant::now() + *this.idle_timeout;
                this.idle.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(source))) => {
                *this.finished = true;
                warn!(
                    provider = %this.provider,
                    backend_model = %this.backend_model,
                    slot = %this.slot,
                    delivered = *this.delivered,
                    error = %source,
                    "upstream stream failed"
                );
                Poll::Ready(Some(Err(GatewayError::StreamInterrupted {
                    provider: this.provider.clone(),
                    delivered: *this.delivered,
                    source,
                })))
            }
            Poll::Ready(None) => {
                *this.finished = true;
                if let Some(usage) = this.usage.as_ref() {
                    log_usage(this.provider, this.backend_model, usage);
                }
                debug!(
                    provider = %this.provider,
                    delivered = *this.delivered,
                    "upstream stream completed"
                );
                Poll::Ready(None)
            }
            Poll::Pending => match this.idle.as_mut().poll(cx) {
                Poll::Ready(()) => {
                    *this.finished = true;
                    let source = UpstreamError::Timeout(format!(
                        "no chunk received within {}s",
                        this.idle_timeout.as_secs_f64()
                    ));
                    warn!(
                        provider = %this.provider,
                        backend_model = %this.backend_model,
                        delivered = *this.delivered,
                        "upstream stream went idle"
                    );
                    Poll::Ready(Some(Err(GatewayError::StreamInterrupted {
                        provider: this.provider.clone(),
                        delivered: *this.delivered,
                        source,
                    })))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

/// Log token usage reported by a provider.
pub(crate) fn log_usage(provider: &str, backend_model: &str, usage: &Value) {
    let tokens = |field: &str| usage.get(field).and_then(Value::as_u64);
    info!(
        provider,
        backend_model,
        prompt_tokens = tokens("prompt_tokens"),
        completion_tokens = tokens("completion_tokens"),
        total_tokens = tokens("total_tokens"),
        "token usage"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, StreamExt};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn relay(items: Vec<Result<Value, UpstreamError>>) -> RelayStream {
        RelayStream::new(
            Box::pin(stream::iter(items)),
            "acme",
            "acme-fast-v2",
            "slotA",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_relays_chunks_in_order() {
        let items = (0..5).map(|n| Ok(json!({ "n": n }))).collect();
        let chunks: Vec<_> = relay(items).collect().await;
        let ns: Vec<_> = chunks
            .into_iter()
            .map(|c| c.unwrap()["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_error_is_terminal() {
        let mut relay = Box::pin(relay(vec![
            Ok(json!({"n": 1})),
            Err(UpstreamError::Stream("connection reset".into())),
            Ok(json!({"n": 2})),
        ]));

        assert!(relay.next().await.unwrap().is_ok());
        match relay.next().await {
            Some(Err(GatewayError::StreamInterrupted { delivered, .. })) => {
                assert_eq!(delivered, 1)
            }
            other => panic!("expected interruption, got {:?}", other),
        }
        assert!(relay.next().await.is_none());
        assert!(relay.next().await.is_none());
        assert_eq!(relay.delivered(), 1);
    }

    /// Flags when the upstream stream it lives in is dropped
    struct ReleaseGuard(Arc<AtomicBool>);

    impl Drop for ReleaseGuard {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_client_disconnect_releases_upstream() {
        let released = Arc::new(AtomicBool::new(false));
        let guard = ReleaseGuard(Arc::clone(&released));
        let inner = stream::iter(vec![Ok::<_, UpstreamError>(json!({"n": 1}))])
            .chain(stream::pending())
            .map(move |item| {
                let _held = &guard;
                item
            });
        let mut relay = Box::pin(RelayStream::new(
            Box::pin(inner),
            "acme",
            "acme-fast-v2",
            "slotA",
            Duration::from_secs(30),
        ));

        assert!(relay.next().await.unwrap().is_ok());
        assert_eq!(relay.delivered(), 1);
        assert!(!released.load(Ordering::SeqCst));

        drop(relay);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_ends_stream() {
        let inner =
            stream::iter(vec![Ok::<_, UpstreamError>(json!({"n": 1}))]).chain(stream::pending());
        let mut relay = Box::pin(RelayStream::new(
            Box::pin(inner),
            "acme",
            "acme-fast-v2",
            "slotA",
            Duration::from_secs(2),
        ));

        assert!(relay.next().await.unwrap().is_ok());
        match relay.next().await {
            Some(Err(GatewayError::StreamInterrupted { source, .. })) => {
                assert!(matches!(source, UpstreamError::Timeout(_)))
            }
            other => panic!("expected idle timeout, got {:?}", other),
        }
        assert!(relay.next().await.is_none());
    }

    #[tokio::test]
    async fn test_captures_usage_chunk() {
        let mut relay = Box::pin(relay(vec![
            Ok(json!({"choices": [{"delta": {"content": "hi"}}], "usage": null})),
            Ok(json!({"choices": [], "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}})),
        ]));
        while relay.next().await.is_some() {}
        assert_eq!(relay.usage.as_ref().unwrap()["total_tokens"], 4);
        assert_eq!(relay.slot(), "slotA");
    }
}
