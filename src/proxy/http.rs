use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::data_stream::{encode_event, CONTENT_TYPE, PROTOCOL_HEADER, PROTOCOL_VERSION};
use crate::api::ProxyChatRequest;
use crate::core::backend::{EventStream, GenerationRequest};
use crate::core::catalog::{ModelCatalog, ModelDescriptor};
use crate::proxy::{ProxyError, StreamingProxy};

pub const CHAT_PATH: &str = "/api/chat";
pub const MODELS_PATH: &str = "/api/models";
pub const HEALTH_PATH: &str = "/health";

#[derive(Clone)]
pub struct AppState {
    pub proxy: Arc<StreamingProxy>,
}

impl AppState {
    pub fn new(proxy: StreamingProxy) -> Self {
        Self {
            proxy: Arc::new(proxy),
        }
    }

    fn catalog(&self) -> &ModelCatalog {
        self.proxy.catalog()
    }
}

// Requests refused before streaming starts get a plain-text 500.
impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(CHAT_PATH, post(chat))
        .route(MODELS_PATH, get(models))
        .route(HEALTH_PATH, get(health))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "proxy listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ProxyChatRequest>,
) -> Result<Response, ProxyError> {
    let request = GenerationRequest {
        messages: body.messages,
        model: body.model,
    };
    let cancel = CancellationToken::new();
    let events = state.proxy.generate(request, cancel.clone()).map_err(|err| {
        warn!(error = %err, "refusing chat request");
        err
    })?;

    Ok(data_stream_response(events, cancel))
}

async fn models(State(state): State<AppState>) -> Json<Vec<ModelDescriptor>> {
    Json(state.catalog().list().to_vec())
}

async fn health() -> &'static str {
    "ok"
}

/// Relay generation events as data-stream lines. Dropping the body (client
/// gone) cancels the generation.
fn data_stream_body(
    mut events: EventStream,
    cancel: CancellationToken,
) -> impl futures_util::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        let _cancel_on_drop = cancel.drop_guard();
        while let Some(event) = events.next().await {
            yield Ok::<Bytes, Infallible>(encode_event(&event));
        }
    }
}

fn data_stream_response(events: EventStream, cancel: CancellationToken) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(
        HeaderName::from_static(PROTOCOL_HEADER),
        HeaderValue::from_static(PROTOCOL_VERSION),
    );
    (headers, Body::from_stream(data_stream_body(events, cancel))).into_response()
}
