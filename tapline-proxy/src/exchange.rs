use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use tapline_net::{ParseStatus, Request, RequestParser, Response};

use crate::body::parse_response_body;
use crate::capture::{HeaderEntry, InterceptedRequest, InterceptedResponse};
use crate::error::ProxyError;
use crate::events::ProxyEvent;
use crate::forward::{forward, push_header};
use crate::proxy::ProxyState;
use crate::source::detect_source;
use crate::target::Target;

const READ_CHUNK: usize = 8192;

pub(crate) const BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

const PROXY_ERROR_BODY: &str = "Proxy Error";

// Recomputed or owned by the proxy-client connection.
const RELAY_SKIP_HEADERS: &[&str] = &[
    "transfer-encoding",
    "connection",
    "keep-alive",
    "content-length",
];

/// When a request's head was received; the exchange is timed from here.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Arrival {
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) started: Instant,
}

impl Arrival {
    fn now() -> Self {
        Self {
            timestamp: Utc::now(),
            started: Instant::now(),
        }
    }
}

/// Reads the next complete request from a client connection. Returns `None`
/// when the client closes between requests.
pub(crate) async fn read_request<S>(
    stream: &mut S,
    parser: &mut RequestParser,
) -> Result<Option<(Request, Arrival)>, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut read = 0;
    let mut arrival = None;

    loop {
        match parser.push(&buffer[..read]) {
            ParseStatus::Complete(message) => {
                return Ok(Some((message, arrival.unwrap_or_else(Arrival::now))));
            }
            ParseStatus::Error(error) => {
                return Err(ProxyError::Parse(format!(
                    "{:?} at byte {}",
                    error.kind, error.offset
                )));
            }
            ParseStatus::NeedMore => {}
        }
        if arrival.is_none() && parser.head_received() {
            arrival = Some(Arrival::now());
        }

        read = stream.read(&mut buffer).await?;
        if read == 0 {
            if parser.take_buffered().is_empty() && !parser.head_received() {
                return Ok(None);
            }
            return Err(ProxyError::Parse("client closed mid-request".to_string()));
        }
    }
}

/// Captures one request, forwards it, and relays the outcome to the client.
/// Upstream failures become a 502 for the client and an error event; only
/// client I/O failures are returned.
pub(crate) async fn serve_exchange<C>(
    state: &ProxyState,
    client: &mut C,
    request: Request,
    arrival: Arrival,
    target: Target,
) -> Result<(), ProxyError>
where
    C: AsyncWrite + Unpin,
{
    let id = state.next_request_id();
    let keep_alive = request.keep_alive();

    let captured = capture_request(id, &request, arrival.timestamp, &target);
    info!(
        id,
        method = %captured.method,
        url = %captured.url,
        source = %captured.source,
        "request captured"
    );
    state
        .events
        .emit(ProxyEvent::RequestCaptured(captured.clone()));

    let bytes = match forward(&state.connector, &target, &request).await {
        Ok(response) => {
            let captured_response = capture_response(id, &response, arrival.started.elapsed());
            debug!(
                id,
                status = captured_response.status_code,
                size = captured_response.size,
                duration_ms = captured_response.duration_ms,
                "response captured"
            );
            state.events.emit(ProxyEvent::ResponseCaptured {
                request: captured,
                response: captured_response,
            });
            relay_bytes(&response, &request.line.method, keep_alive)
        }
        Err(err) => {
            warn!(id, url = %captured.url, error = %err, "forwarding failed");
            state.events.emit(ProxyEvent::ForwardingError {
                request_id: id,
                message: err.to_string(),
            });
            bad_gateway(keep_alive)
        }
    };

    client.write_all(&bytes).await?;
    client.flush().await?;
    Ok(())
}

fn capture_request(
    id: u64,
    request: &Request,
    timestamp: DateTime<Utc>,
    target: &Target,
) -> InterceptedRequest {
    InterceptedRequest {
        id,
        timestamp,
        method: request.line.method.clone(),
        url: target.url.clone(),
        protocol: target.protocol,
        host: target.host.clone(),
        path: target.path.clone(),
        headers: HeaderEntry::from_headers(&request.headers),
        body: String::from_utf8_lossy(&request.body).into_owned(),
        source: detect_source(&request.headers),
    }
}

fn capture_response(id: u64, response: &Response, elapsed: Duration) -> InterceptedResponse {
    InterceptedResponse {
        id,
        status_code: response.line.status_code,
        status_message: response.line.reason.clone(),
        headers: HeaderEntry::from_headers(&response.headers),
        body: parse_response_body(
            &response.body,
            response.header("content-type"),
            response.header("content-encoding"),
        ),
        size: response.body.len(),
        duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

/// The upstream response re-framed for the client. The body stays in its
/// original content encoding.
pub(crate) fn relay_bytes(response: &Response, method: &str, keep_alive: bool) -> Vec<u8> {
    let status = response.line.status_code;
    let mut bytes = Vec::with_capacity(256 + response.body.len());
    bytes.extend_from_slice(format!("HTTP/1.1 {} {}\r\n", status, response.line.reason).as_bytes());
    for header in &response.headers {
        if RELAY_SKIP_HEADERS.contains(&header.name.to_ascii_lowercase().as_str()) {
            continue;
        }
        push_header(&mut bytes, &header.raw_name, &header.value);
    }

    let bodyless_status = (100..200).contains(&status) || status == 204 || status == 304;
    if method.eq_ignore_ascii_case("HEAD") {
        if let Some(length) = response.header("content-length") {
            push_header(&mut bytes, "Content-Length", length);
        }
    } else if !bodyless_status {
        push_header(&mut bytes, "Content-Length", &response.body.len().to_string());
    }
    push_header(
        &mut bytes,
        "Connection",
        if keep_alive { "keep-alive" } else { "close" },
    );
    bytes.extend_from_slice(b"\r\n");
    bytes.extend_from_slice(&response.body);
    bytes
}

fn bad_gateway(keep_alive: bool) -> Vec<u8> {
    format!(
        "HTTP/1.1 502 Bad Gateway\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n{}",
        PROXY_ERROR_BODY.len(),
        if keep_alive { "keep-alive" } else { "close" },
        PROXY_ERROR_BODY
    )
    .into_bytes()
}
