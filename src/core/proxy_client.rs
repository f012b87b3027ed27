//! Generation backend that talks to a remote proxy over `POST /api/chat`.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::data_stream::DataStreamDecoder;
use crate::api::ProxyChatRequest;
use crate::core::backend::{EventStream, GenerationBackend, GenerationRequest};
use crate::core::chat_stream::{FailureReason, StreamEvent};
use crate::proxy::sse::summarize_error_body;
use crate::utils::url::construct_api_url;

pub struct ProxyClient {
    client: reqwest::Client,
    endpoint: String,
}

impl ProxyClient {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            endpoint: construct_api_url(base_url, "api/chat"),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl GenerationBackend for ProxyClient {
    fn open(&self, request: GenerationRequest, cancel: CancellationToken) -> EventStream {
        let http_request = self.client.post(&self.endpoint).json(&ProxyChatRequest {
            messages: request.messages,
            model: request.model,
        });

        let stream = async_stream::stream! {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                sent = http_request.send() => Some(sent),
            };

            let response = match sent {
                None => return,
                Some(Ok(response)) => response,
                Some(Err(err)) => {
                    warn!(error = %err, "proxy request failed");
                    yield StreamEvent::Failed(FailureReason::unavailable(err.to_string()));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                let body = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    body = response.text() => Some(body.unwrap_or_default()),
                };
                let Some(body) = body else { return };
                yield StreamEvent::Failed(FailureReason::UpstreamRejected {
                    status: Some(status.as_u16()),
                    message: summarize_error_body(&body),
                });
                return;
            }

            let mut body = response.bytes_stream();
            let mut decoder = DataStreamDecoder::new();

            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!("proxy stream cancelled");
                        return;
                    }
                    next = body.next() => next,
                };

                match next {
                    Some(Ok(bytes)) => decoder.push(&bytes),
                    Some(Err(err)) => {
                        yield StreamEvent::Failed(FailureReason::unavailable(format!(
                            "proxy stream interrupted: {err}"
                        )));
                        return;
                    }
                    None => {
                        let tail = decoder.finish();
                        match tail {
                            Ok(Some(event)) => {
                                let terminal = event.is_terminal();
                                yield event;
                                if terminal {
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(err) => {
                                yield StreamEvent::Failed(FailureReason::malformed(err.to_string()));
                                return;
                            }
                        }
                        yield StreamEvent::Failed(FailureReason::unavailable(
                            "proxy stream ended before completion",
                        ));
                        return;
                    }
                }

                while let Some(decoded) = decoder.next_event() {
                    match decoded {
                        Ok(event) => {
                            let terminal = event.is_terminal();
                            yield event;
                            if terminal {
                                return;
                            }
                        }
                        Err(err) => {
                            yield StreamEvent::Failed(FailureReason::malformed(err.to_string()));
                            return;
                        }
                    }
                }
            }
        };

        Box::pin(stream)
    }
}
