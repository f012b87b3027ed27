//! Server-side model-routing proxy.
//!
//! [`StreamingProxy::generate`] turns one transcript plus model id into one
//! upstream streaming completion and relays it as [`StreamEvent`]s. It holds no
//! per-call state, so a single instance serves any number of concurrent
//! conversations.

pub mod http;
pub mod sse;

use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ChatRequest;
use crate::core::backend::{EventStream, GenerationBackend, GenerationRequest};
use crate::core::catalog::ModelCatalog;
use crate::core::chat_stream::{FailureReason, StreamEvent};
use crate::core::config::ProxySettings;
use crate::core::constants::{MAX_TOKENS, TEMPERATURE};
use crate::core::message::{ROLE_ASSISTANT, ROLE_USER};
use crate::utils::auth::add_upstream_headers;
use crate::utils::url::construct_api_url;
use sse::{summarize_error_body, SseDecoder, SseItem};

const ROLE_SYSTEM: &str = "system";

/// Reasons a request is refused before any upstream call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyError {
    #[error("transcript must contain at least one message")]
    EmptyTranscript,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("message {index} has unsupported role `{role}`")]
    InvalidRole { index: usize, role: String },
}

pub struct StreamingProxy {
    client: reqwest::Client,
    settings: Arc<ProxySettings>,
    catalog: Arc<ModelCatalog>,
}

impl StreamingProxy {
    pub fn new(settings: Arc<ProxySettings>, catalog: Arc<ModelCatalog>) -> Self {
        Self::with_client(reqwest::Client::new(), settings, catalog)
    }

    pub fn with_client(
        client: reqwest::Client,
        settings: Arc<ProxySettings>,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            client,
            settings,
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn validate(&self, request: &GenerationRequest) -> Result<(), ProxyError> {
        if request.messages.is_empty() {
            return Err(ProxyError::EmptyTranscript);
        }

        if let Some((index, message)) = request.messages.iter().enumerate().find(|(_, m)| {
            !matches!(m.role.as_str(), ROLE_USER | ROLE_ASSISTANT | ROLE_SYSTEM)
        }) {
            return Err(ProxyError::InvalidRole {
                index,
                role: message.role.clone(),
            });
        }

        self.catalog
            .resolve(&request.model)
            .map_err(|_| ProxyError::UnknownModel(request.model.clone()))?;

        Ok(())
    }

    /// Validate, then return the lazy event sequence. Nothing touches the
    /// network until the sequence is first polled.
    pub fn generate(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, ProxyError> {
        self.validate(&request)?;
        Ok(relay(
            self.client.clone(),
            Arc::clone(&self.settings),
            request,
            cancel,
        ))
    }
}

impl GenerationBackend for StreamingProxy {
    fn open(&self, request: GenerationRequest, cancel: CancellationToken) -> EventStream {
        match self.generate(request, cancel) {
            Ok(events) => events,
            Err(err) => {
                let reason = FailureReason::UpstreamRejected {
                    status: None,
                    message: err.to_string(),
                };
                futures_util::stream::iter([StreamEvent::Failed(reason)]).boxed()
            }
        }
    }
}

enum Step<T> {
    Ready(T),
    Cancelled,
    TimedOut,
}

async fn race<F: std::future::Future>(
    future: F,
    cancel: &CancellationToken,
    deadline: tokio::time::Instant,
) -> Step<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Step::Cancelled,
        _ = tokio::time::sleep_until(deadline) => Step::TimedOut,
        output = future => Step::Ready(output),
    }
}

fn relay(
    client: reqwest::Client,
    settings: Arc<ProxySettings>,
    request: GenerationRequest,
    cancel: CancellationToken,
) -> EventStream {
    let stream = async_stream::stream! {
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + settings.timeout;
        let timeout = StreamEvent::Failed(FailureReason::Timeout {
            after_secs: settings.timeout.as_secs(),
        });
        let model = request.model.clone();
        let message_count = request.messages.len();
        let mut delta_count = 0usize;

        info!(model = %model, messages = message_count, "opening upstream stream");

        let chat_url = construct_api_url(&settings.base_url, "chat/completions");
        let body = ChatRequest {
            model: request.model,
            messages: request.messages,
            stream: true,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };
        let http_request = add_upstream_headers(client.post(chat_url), &settings).json(&body);

        let response = match race(http_request.send(), &cancel, deadline).await {
            Step::Ready(Ok(response)) => response,
            Step::Ready(Err(err)) => {
                let reason = classify_transport_error(&err, &settings);
                warn!(model = %model, kind = reason.kind(), error = %err, "upstream request failed");
                yield StreamEvent::Failed(reason);
                return;
            }
            Step::Cancelled => {
                debug!(model = %model, "cancelled before upstream responded");
                return;
            }
            Step::TimedOut => {
                warn!(model = %model, "upstream did not respond before the deadline");
                yield timeout;
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = match race(response.text(), &cancel, deadline).await {
                Step::Ready(Ok(text)) => summarize_error_body(&text),
                Step::Ready(Err(_)) => "<no body>".to_string(),
                Step::Cancelled => return,
                Step::TimedOut => {
                    yield timeout;
                    return;
                }
            };
            warn!(model = %model, status = status.as_u16(), %message, "upstream rejected request");
            yield StreamEvent::Failed(FailureReason::UpstreamRejected {
                status: Some(status.as_u16()),
                message,
            });
            return;
        }

        let mut body = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            let next = match race(body.next(), &cancel, deadline).await {
                Step::Ready(next) => next,
                Step::Cancelled => {
                    debug!(model = %model, deltas = delta_count, "cancelled mid-stream; dropping upstream");
                    return;
                }
                Step::TimedOut => {
                    warn!(model = %model, deltas = delta_count, "generation exceeded the deadline");
                    yield timeout;
                    return;
                }
            };

            match next {
                Some(Ok(bytes)) => decoder.push(&bytes),
                Some(Err(err)) => {
                    let reason =
                        FailureReason::unavailable(format!("upstream stream interrupted: {err}"));
                    warn!(model = %model, deltas = delta_count, %reason, "upstream stream failed");
                    yield StreamEvent::Failed(reason);
                    return;
                }
                None => {
                    // A clean close without `[DONE]` still counts as completion.
                    match decoder.finish() {
                        Ok(Some(SseItem::Delta(text))) => yield StreamEvent::Delta(text),
                        Ok(_) => {}
                        Err(reason) => {
                            warn!(model = %model, kind = reason.kind(), %reason, "upstream stream failed");
                            yield StreamEvent::Failed(reason);
                            return;
                        }
                    }
                    info!(model = %model, deltas = delta_count, "upstream closed without a done marker");
                    yield StreamEvent::Done;
                    return;
                }
            }

            while let Some(item) = decoder.next_item() {
                match item {
                    Ok(SseItem::Delta(text)) => {
                        delta_count += 1;
                        yield StreamEvent::Delta(text);
                    }
                    Ok(SseItem::Done) => {
                        info!(
                            model = %model,
                            deltas = delta_count,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "upstream stream completed"
                        );
                        yield StreamEvent::Done;
                        return;
                    }
                    Err(reason) => {
                        warn!(model = %model, kind = reason.kind(), deltas = delta_count, %reason, "upstream stream failed");
                        yield StreamEvent::Failed(reason);
                        return;
                    }
                }
            }
        }
    };

    Box::pin(stream)
}

fn classify_transport_error(err: &reqwest::Error, settings: &ProxySettings) -> FailureReason {
    if err.is_timeout() {
        FailureReason::Timeout {
            after_secs: settings.timeout.as_secs(),
        }
    } else {
        FailureReason::unavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ChatMessage;
    use crate::core::config::Config;
    use crate::utils::test_utils::{
        closed_port_url, sse_chunk, spawn_fake_upstream, FakeUpstream, TEST_MODEL,
    };
    use std::time::Duration;

    fn settings_for(base_url: &str, timeout: Duration) -> Arc<ProxySettings> {
        let mut settings =
            ProxySettings::resolve_with_env(&Config::default(), "test-key".into(), |_| None);
        settings.base_url = base_url.to_string();
        settings.timeout = timeout;
        Arc::new(settings)
    }

    fn proxy_for(base_url: &str, timeout: Duration) -> StreamingProxy {
        StreamingProxy::new(
            settings_for(base_url, timeout),
            Arc::new(ModelCatalog::builtin().expect("catalog")),
        )
    }

    fn request(text: &str) -> GenerationRequest {
        GenerationRequest {
            messages: vec![ChatMessage {
                role: "user".into(),
                content: text.into(),
            }],
            model: TEST_MODEL.into(),
        }
    }

    async fn collect(stream: EventStream) -> Vec<StreamEvent> {
        stream.collect().await
    }

    #[test]
    fn validate_rejects_bad_requests_before_any_network_use() {
        let proxy = proxy_for("http://127.0.0.1:9", Duration::from_secs(1));

        let mut empty = request("x");
        empty.messages.clear();
        assert_eq!(proxy.validate(&empty), Err(ProxyError::EmptyTranscript));

        let mut unknown = request("x");
        unknown.model = "openai/gpt-4o".into();
        assert_eq!(
            proxy.validate(&unknown),
            Err(ProxyError::UnknownModel("openai/gpt-4o".into()))
        );

        let mut bad_role = request("x");
        bad_role.messages[0].role = "tool".into();
        assert!(matches!(
            proxy.validate(&bad_role),
            Err(ProxyError::InvalidRole { index: 0, .. })
        ));

        assert!(proxy.validate(&request("x")).is_ok());
    }

    #[tokio::test]
    async fn relays_deltas_in_order_then_done() {
        let upstream = spawn_fake_upstream(FakeUpstream::sse(vec![
            sse_chunk("Hel"),
            sse_chunk("lo, "),
            sse_chunk("world"),
            "data: [DONE]\n\n".into(),
        ]))
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_secs(5));

        let events = collect(
            proxy
                .generate(request("greet"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Hel".into()),
                StreamEvent::Delta("lo, ".into()),
                StreamEvent::Delta("world".into()),
                StreamEvent::Done,
            ]
        );

        let captured = upstream.captured().await.expect("request captured");
        assert!(captured.request_line.starts_with("POST /chat/completions"));
        assert_eq!(captured.header("authorization"), Some("Bearer test-key"));
        assert_eq!(captured.header("http-referer"), Some("http://localhost:3000"));
        assert_eq!(captured.header("x-title"), Some("Multi-Model Chatbot"));

        let body: serde_json::Value = serde_json::from_slice(&captured.body).expect("json body");
        assert_eq!(body["model"], TEST_MODEL);
        assert_eq!(body["stream"], true);
        assert_eq!(body["max_tokens"], 4000);
        assert_eq!(body["messages"][0]["content"], "greet");
    }

    #[tokio::test]
    async fn clean_close_without_done_marker_completes() {
        let upstream = spawn_fake_upstream(FakeUpstream::sse(vec![
            sse_chunk("Recursion "),
            sse_chunk("is..."),
        ]))
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_secs(5));

        let events = collect(
            proxy
                .generate(request("Explain recursion"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamEvent::Delta("Recursion ".into()),
                StreamEvent::Delta("is...".into()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn non_streaming_success_body_is_malformed() {
        let upstream = spawn_fake_upstream(FakeUpstream::status(
            200,
            r#"{"choices":[{"message":{"role":"assistant","content":"Full answer"}}]}"#,
        ))
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_secs(5));

        let events = collect(
            proxy
                .generate(request("Explain recursion"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            StreamEvent::Failed(FailureReason::MalformedUpstreamChunk { .. })
        ));
    }

    #[tokio::test]
    async fn non_success_status_is_rejected_with_summary() {
        let upstream = spawn_fake_upstream(FakeUpstream::status(
            402,
            r#"{"error":{"message":"Insufficient credits","code":402}}"#,
        ))
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_secs(5));

        let events = collect(
            proxy
                .generate(request("hi"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(
            events,
            vec![StreamEvent::Failed(FailureReason::UpstreamRejected {
                status: Some(402),
                message: "Insufficient credits".into(),
            })]
        );
    }

    #[tokio::test]
    async fn malformed_chunk_aborts_after_partial_output() {
        let upstream = spawn_fake_upstream(FakeUpstream::sse(vec![
            sse_chunk("partial"),
            "data: {garbled\n\n".into(),
            sse_chunk("never delivered"),
        ]))
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_secs(5));

        let events = collect(
            proxy
                .generate(request("hi"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Delta("partial".into()));
        assert!(matches!(
            events[1],
            StreamEvent::Failed(FailureReason::MalformedUpstreamChunk { .. })
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_unavailable() {
        let proxy = proxy_for(&closed_port_url().await, Duration::from_secs(5));

        let events = collect(
            proxy
                .generate(request("hi"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            StreamEvent::Failed(FailureReason::UpstreamUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn silent_upstream_times_out_without_done() {
        let upstream = spawn_fake_upstream(FakeUpstream::silent()).await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_millis(300));

        let started = Instant::now();
        let events = collect(
            proxy
                .generate(request("hi"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(
            events,
            vec![StreamEvent::Failed(FailureReason::Timeout { after_secs: 0 })]
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn stalled_stream_times_out_after_partial_output() {
        let upstream = spawn_fake_upstream(
            FakeUpstream::sse(vec![sse_chunk("slow ")]).hold_open(),
        )
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_millis(400));

        let events = collect(
            proxy
                .generate(request("hi"), CancellationToken::new())
                .expect("valid"),
        )
        .await;

        assert_eq!(events.first(), Some(&StreamEvent::Delta("slow ".into())));
        assert!(matches!(
            events.last(),
            Some(StreamEvent::Failed(FailureReason::Timeout { .. }))
        ));
        assert!(!events.contains(&StreamEvent::Done));
    }

    #[tokio::test]
    async fn cancellation_releases_the_upstream_connection() {
        let upstream = spawn_fake_upstream(
            FakeUpstream::sse(vec![sse_chunk("first")]).hold_open(),
        )
        .await;
        let proxy = proxy_for(&upstream.base_url, Duration::from_secs(30));
        let cancel = CancellationToken::new();

        let mut events = proxy
            .generate(request("hi"), cancel.clone())
            .expect("valid");
        assert_eq!(events.next().await, Some(StreamEvent::Delta("first".into())));

        cancel.cancel();
        assert_eq!(events.next().await, None);
        drop(events);

        let closed = tokio::time::timeout(Duration::from_secs(5), upstream.closed()).await;
        assert!(closed.is_ok(), "upstream connection should be closed promptly");
    }

    #[tokio::test]
    async fn open_reports_validation_failure_in_band() {
        let proxy = proxy_for("http://127.0.0.1:9", Duration::from_secs(1));
        let mut bad = request("x");
        bad.model = "nope/nope".into();

        let events = collect(proxy.open(bad, CancellationToken::new())).await;

        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Failed(FailureReason::UpstreamRejected { status: None, .. })]
        ));
    }
}
