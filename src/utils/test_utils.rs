//! Shared fixtures: scripted generation backends and a loopback fake of the
//! upstream chat-completions endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::core::backend::{EventStream, GenerationBackend, GenerationRequest};
use crate::core::chat_stream::StreamEvent;

pub const TEST_MODEL: &str = "deepseek/deepseek-r1-0528:free";

/// Replays a fixed event list for every call and records the requests it saw.
pub struct ScriptedBackend {
    events: Vec<StreamEvent>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn new(events: Vec<StreamEvent>) -> Self {
        Self {
            events,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn open(&self, request: GenerationRequest, _cancel: CancellationToken) -> EventStream {
        self.requests.lock().expect("requests lock").push(request);
        futures_util::stream::iter(self.events.clone()).boxed()
    }
}

/// Never produces anything.
pub struct StalledBackend;

impl GenerationBackend for StalledBackend {
    fn open(&self, _request: GenerationRequest, _cancel: CancellationToken) -> EventStream {
        futures_util::stream::pending().boxed()
    }
}

/// Emits its first events, then waits until cancelled and ends without a
/// terminal event.
pub struct GatedBackend {
    head: Vec<StreamEvent>,
}

impl GatedBackend {
    pub fn new(head: Vec<StreamEvent>) -> Self {
        Self { head }
    }
}

impl GenerationBackend for GatedBackend {
    fn open(&self, _request: GenerationRequest, cancel: CancellationToken) -> EventStream {
        let head = futures_util::stream::iter(self.head.clone());
        let tail = futures_util::stream::once(async move { cancel.cancelled_owned().await })
            .filter_map(|_| async { None::<StreamEvent> });
        head.chain(tail).boxed()
    }
}

pub fn sse_chunk(content: &str) -> String {
    format!(
        "data: {}\n\n",
        serde_json::json!({"choices":[{"delta":{"content": content}}]})
    )
}

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Sse(Vec<String>),
    Status { code: u16, body: String },
    Silent,
}

/// Scripted behaviour for one fake upstream.
#[derive(Debug, Clone)]
pub struct FakeUpstream {
    reply: Reply,
    hold_open: bool,
}

impl FakeUpstream {
    /// `200 text/event-stream`, one chunked frame per entry.
    pub fn sse(frames: Vec<String>) -> Self {
        Self {
            reply: Reply::Sse(frames),
            hold_open: false,
        }
    }

    pub fn status(code: u16, body: &str) -> Self {
        Self {
            reply: Reply::Status {
                code,
                body: body.to_string(),
            },
            hold_open: false,
        }
    }

    /// Reads the request and never answers.
    pub fn silent() -> Self {
        Self {
            reply: Reply::Silent,
            hold_open: true,
        }
    }

    /// Keep the response open after the scripted frames instead of ending it.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

pub struct FakeUpstreamHandle {
    pub base_url: String,
    captured: Arc<tokio::sync::Mutex<Option<CapturedRequest>>>,
    closed: Arc<Notify>,
}

impl FakeUpstreamHandle {
    pub async fn captured(&self) -> Option<CapturedRequest> {
        self.captured.lock().await.clone()
    }

    /// Resolves once the client side of a connection has gone away.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

pub async fn spawn_fake_upstream(script: FakeUpstream) -> FakeUpstreamHandle {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let captured = Arc::new(tokio::sync::Mutex::new(None));
    let closed = Arc::new(Notify::new());

    let captured_for_server = Arc::clone(&captured);
    let closed_for_server = Arc::clone(&closed);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let script = script.clone();
            let captured = Arc::clone(&captured_for_server);
            let closed = Arc::clone(&closed_for_server);
            tokio::spawn(async move {
                let _ = serve_connection(stream, script, captured).await;
                closed.notify_one();
            });
        }
    });

    FakeUpstreamHandle {
        base_url: format!("http://{addr}"),
        captured,
        closed,
    }
}

/// A loopback URL with nothing listening on it.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    drop(listener);
    format!("http://{addr}")
}

async fn serve_connection(
    mut stream: TcpStream,
    script: FakeUpstream,
    captured: Arc<tokio::sync::Mutex<Option<CapturedRequest>>>,
) -> Result<(), String> {
    let (request_line, headers, body) = read_http_request(&mut stream).await?;
    *captured.lock().await = Some(CapturedRequest {
        request_line,
        headers,
        body,
    });

    match &script.reply {
        Reply::Sse(frames) => {
            let head = "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n";
            write_all(&mut stream, head.as_bytes()).await?;
            for frame in frames {
                let encoded = format!("{:x}\r\n{frame}\r\n", frame.len());
                write_all(&mut stream, encoded.as_bytes()).await?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            if !script.hold_open {
                write_all(&mut stream, b"0\r\n\r\n").await?;
            }
        }
        Reply::Status { code, body } => {
            let response = format!(
                "HTTP/1.1 {code} Error\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            write_all(&mut stream, response.as_bytes()).await?;
        }
        Reply::Silent => {}
    }

    if script.hold_open {
        wait_for_eof(&mut stream).await;
    } else {
        let _ = stream.shutdown().await;
    }
    Ok(())
}

async fn write_all(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), String> {
    stream.write_all(bytes).await.map_err(|err| err.to_string())?;
    stream.flush().await.map_err(|err| err.to_string())
}

async fn wait_for_eof(stream: &mut TcpStream) {
    let mut scratch = [0_u8; 256];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}

async fn read_http_request(
    stream: &mut TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    let mut buffer = Vec::new();
    let header_end = loop {
        if let Some(index) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
            break index + 4;
        }
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
    };

    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok((request_line, headers, body))
}
