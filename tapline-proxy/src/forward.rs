use std::pin::Pin;

use openssl::ssl::SslConnector;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tracing::debug;

use tapline_net::{ParseStatus, Request, Response, ResponseParser};

use crate::capture::Protocol;
use crate::error::ProxyError;
use crate::target::Target;

const READ_CHUNK: usize = 8192;

// Never forwarded upstream; framing is recomputed from the buffered body.
const UPSTREAM_SKIP_HEADERS: &[&str] = &[
    "proxy-connection",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
];

/// Sends a fully buffered request to the origin and buffers its response.
pub(crate) async fn forward(
    connector: &SslConnector,
    target: &Target,
    request: &Request,
) -> Result<Response, ProxyError> {
    let upstream = TcpStream::connect((target.host.as_str(), target.port))
        .await
        .map_err(|err| {
            ProxyError::Upstream(format!("connect {}: {err}", target.authority()))
        })?;
    let _ = upstream.set_nodelay(true);
    let bytes = serialize_request(request, target);
    let method = request.line.method.as_str();

    match target.protocol {
        Protocol::Http => exchange(upstream, &bytes, method).await,
        Protocol::Https => {
            let tls = connect_tls(connector, &target.host, upstream).await?;
            exchange(tls, &bytes, method).await
        }
    }
}

async fn connect_tls(
    connector: &SslConnector,
    host: &str,
    upstream: TcpStream,
) -> Result<SslStream<TcpStream>, ProxyError> {
    let ssl = connector
        .configure()
        .map_err(|err| ProxyError::Upstream(err.to_string()))?
        .verify_hostname(false)
        .into_ssl(host)
        .map_err(|err| ProxyError::Upstream(err.to_string()))?;
    let mut tls = SslStream::new(ssl, upstream)
        .map_err(|err| ProxyError::Upstream(err.to_string()))?;
    Pin::new(&mut tls)
        .connect()
        .await
        .map_err(|err| ProxyError::Upstream(format!("TLS handshake with {host}: {err}")))?;
    Ok(tls)
}

async fn exchange<S>(mut stream: S, bytes: &[u8], method: &str) -> Result<Response, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(bytes)
        .await
        .map_err(|err| ProxyError::Upstream(format!("write request: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| ProxyError::Upstream(format!("write request: {err}")))?;
    read_response(&mut stream, method).await
}

/// Reads one final response. Interim 1xx responses other than 101 are
/// discarded.
pub(crate) async fn read_response<S>(stream: &mut S, method: &str) -> Result<Response, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut parser = ResponseParser::for_method(method);
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut read = 0;
    let mut received = 0;
    let mut eof = false;

    loop {
        let status = if eof {
            parser.finish()
        } else {
            parser.push(&buffer[..read])
        };
        match status {
            ParseStatus::Complete(message) if is_interim(message.line.status_code) => {
                debug!(status = message.line.status_code, "skipping interim response");
                read = 0;
                continue;
            }
            ParseStatus::Complete(message) => return Ok(message),
            ParseStatus::Error(error) => {
                return Err(ProxyError::Upstream(format!(
                    "malformed response: {:?} at byte {}",
                    error.kind, error.offset
                )));
            }
            ParseStatus::NeedMore if eof => {
                return Err(ProxyError::Upstream(if received == 0 {
                    "empty response from upstream".to_string()
                } else {
                    "upstream closed before the response completed".to_string()
                }));
            }
            ParseStatus::NeedMore => {}
        }

        match stream.read(&mut buffer).await {
            Ok(0) => eof = true,
            Ok(n) => {
                read = n;
                received += n;
            }
            // TLS origins often close without close_notify once the body is sent.
            Err(err) if received > 0 => {
                debug!(error = %err, "upstream read ended with error, treating as close");
                eof = true;
            }
            Err(err) => return Err(ProxyError::Upstream(format!("read response: {err}"))),
        }
    }
}

fn is_interim(status_code: u16) -> bool {
    (100..200).contains(&status_code) && status_code != 101
}

pub(crate) fn serialize_request(request: &Request, target: &Target) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(512 + request.body.len());
    bytes.extend_from_slice(
        format!("{} {} HTTP/1.1\r\n", request.line.method, target.path).as_bytes(),
    );
    let mut has_host = false;
    for header in &request.headers {
        let name = header.name.to_ascii_lowercase();
        if UPSTREAM_SKIP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if name == "host" {
            has_host = true;
        }
        push_header(&mut bytes, &header.raw_name, &header.value);
    }
    if !has_host {
        push_header(&mut bytes, "Host", &target.authority());
    }
    if !request.body.is_empty() || request.header("content-length").is_some() {
        push_header(&mut bytes, "Content-Length", &request.body.len().to_string());
    }
    push_header(&mut bytes, "Connection", "close");
    bytes.extend_from_slice(b"\r\n");
    bytes.extend_from_slice(&request.body);
    bytes
}

pub(crate) fn push_header(bytes: &mut Vec<u8>, name: &str, value: &str) {
    bytes.extend_from_slice(name.as_bytes());
    bytes.extend_from_slice(b": ");
    bytes.extend_from_slice(value.as_bytes());
    bytes.extend_from_slice(b"\r\n");
}
