use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use tapline_codec::gzip_compress;
use tapline_net::{ParseStatus, Response, ResponseParser};
use tapline_proxy::{
    ClientSource, Protocol, ProxyConfig, ProxyEvent, ProxyEvents, ProxyServer, ResponseBody,
};

fn test_proxy(dir: &tempfile::TempDir) -> ProxyServer {
    let mut config = ProxyConfig::default();
    config.tls.ca_cert_dir = Some(dir.path().join("certs"));
    ProxyServer::from_config(config).unwrap()
}

/// Answers every connection with `response` and reports the raw request head.
async fn start_origin(response: Vec<u8>) -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = Arc::new(response);
    let (seen, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let response = Arc::clone(&response);
            let seen = seen.clone();
            tokio::spawn(async move {
                let head = read_head(&mut stream).await;
                let _ = seen.send(head);
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (addr, seen_rx)
}

async fn read_head<S: AsyncRead + Unpin>(stream: &mut S) -> Vec<u8> {
    let mut head = Vec::new();
    let mut buf = [0u8; 1024];
    while !head.windows(4).any(|window| window == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    head
}

async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, parser: &mut ResponseParser) -> Response {
    let mut buf = [0u8; 4096];
    let mut read = 0;
    loop {
        if let ParseStatus::Complete(message) = parser.push(&buf[..read]) {
            return message;
        }
        read = stream.read(&mut buf).await.unwrap();
        if read == 0 {
            match parser.finish() {
                ParseStatus::Complete(message) => return message,
                other => panic!("incomplete response: {other:?}"),
            }
        }
    }
}

async fn next_event(events: &mut ProxyEvents) -> ProxyEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .unwrap()
        .unwrap()
}

async fn send_through(proxy_port: u16, raw: String) -> Response {
    let mut client = TcpStream::connect(("127.0.0.1", proxy_port)).await.unwrap();
    client.write_all(raw.as_bytes()).await.unwrap();
    read_response(&mut client, &mut ResponseParser::new()).await
}

#[tokio::test]
async fn captures_plain_http_exchange() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    let mut events = proxy.subscribe();
    let port = proxy.start(Some(0)).await.unwrap();

    let (origin, mut seen) = start_origin(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\n\r\nhello".to_vec(),
    )
    .await;
    let response = send_through(
        port,
        format!(
            "GET http://{origin}/greeting?lang=en HTTP/1.1\r\nHost: {origin}\r\nUser-Agent: curl/8.4.0\r\nProxy-Connection: keep-alive\r\nConnection: close\r\n\r\n"
        ),
    )
    .await;
    assert_eq!(response.line.status_code, 200);
    assert_eq!(response.body, b"hello");

    let forwarded = String::from_utf8(seen.recv().await.unwrap()).unwrap();
    assert!(forwarded.starts_with("GET /greeting?lang=en HTTP/1.1\r\n"));
    assert!(!forwarded.to_ascii_lowercase().contains("proxy-connection"));
    assert!(forwarded.contains("Connection: close\r\n"));

    let request = assert_matches!(next_event(&mut events).await, ProxyEvent::RequestCaptured(request) => request);
    assert_eq!(request.id, 1);
    assert_eq!(request.method, "GET");
    assert_eq!(request.protocol, Protocol::Http);
    assert_eq!(request.url, format!("http://{origin}/greeting?lang=en"));
    assert_eq!(request.host, "127.0.0.1");
    assert_eq!(request.path, "/greeting?lang=en");
    assert_eq!(request.source, ClientSource::Curl);
    assert_eq!(request.header("User-Agent"), Some("curl/8.4.0"));

    assert_matches!(next_event(&mut events).await, ProxyEvent::ResponseCaptured { request: echoed, response } => {
        assert_eq!(echoed.id, request.id);
        assert_eq!(response.id, request.id);
        assert_eq!(response.status_code, 200);
        assert_eq!(response.status_message, "OK");
        assert_eq!(response.body.as_text(), Some("hello"));
        assert_eq!(response.header("content-type"), Some("text/plain"));
        assert_eq!(response.size, 5);
    });

    assert_eq!(proxy.status().request_count, 1);
    proxy.stop().await;
}

#[tokio::test]
async fn relays_encoded_body_and_captures_decoded() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    let mut events = proxy.subscribe();
    let port = proxy.start(Some(0)).await.unwrap();

    let compressed = gzip_compress(br#"{"ok":true}"#).unwrap();
    let mut raw = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Encoding: gzip\r\nTransfer-Encoding: chunked\r\n\r\n{:x}\r\n",
        compressed.len()
    )
    .into_bytes();
    raw.extend_from_slice(&compressed);
    raw.extend_from_slice(b"\r\n0\r\n\r\n");
    let (origin, _seen) = start_origin(raw).await;

    let response = send_through(
        port,
        format!("GET http://{origin}/data HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert_eq!(response.body, compressed);
    assert_eq!(response.header("content-encoding"), Some("gzip"));
    assert_eq!(
        response.header("content-length"),
        Some(compressed.len().to_string().as_str())
    );
    assert!(response.header("transfer-encoding").is_none());

    assert_matches!(next_event(&mut events).await, ProxyEvent::RequestCaptured(_));
    assert_matches!(next_event(&mut events).await, ProxyEvent::ResponseCaptured { response, .. } => {
        assert_eq!(response.body, ResponseBody::Text(r#"{"ok":true}"#.to_string()));
        assert_eq!(response.size, compressed.len());
    });
    proxy.stop().await;
}

#[tokio::test]
async fn serves_keep_alive_requests_on_one_connection() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    let mut events = proxy.subscribe();
    let port = proxy.start(Some(0)).await.unwrap();
    let (origin, _seen) =
        start_origin(b"HTTP/1.1 204 No Content\r\n\r\n".to_vec()).await;

    let mut client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    for path in ["/one", "/two"] {
        client
            .write_all(format!("DELETE http://{origin}{path} HTTP/1.1\r\nHost: {origin}\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let response = read_response(&mut client, &mut ResponseParser::new()).await;
        assert_eq!(response.line.status_code, 204);
    }

    let mut ids = Vec::new();
    for _ in 0..4 {
        if let ProxyEvent::ResponseCaptured { response, .. } = next_event(&mut events).await {
            ids.push(response.id);
        }
    }
    assert_eq!(ids, vec![1, 2]);
    proxy.stop().await;
}

#[tokio::test]
async fn unreachable_origin_yields_bad_gateway_and_error_event() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    let mut events = proxy.subscribe();
    let port = proxy.start(Some(0)).await.unwrap();

    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = closed.local_addr().unwrap();
    drop(closed);

    let response = send_through(
        port,
        format!("GET http://{dead}/ HTTP/1.1\r\nHost: {dead}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert_eq!(response.line.status_code, 502);
    assert_eq!(response.body, b"Proxy Error");

    let request = assert_matches!(next_event(&mut events).await, ProxyEvent::RequestCaptured(request) => request);
    assert_matches!(next_event(&mut events).await, ProxyEvent::ForwardingError { request_id, message } => {
        assert_eq!(request_id, request.id);
        assert!(!message.is_empty());
    });
    assert!(proxy.is_running());
    proxy.stop().await;
}

#[tokio::test]
async fn malformed_request_gets_bad_request() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    let port = proxy.start(Some(0)).await.unwrap();

    let response = send_through(port, "NONSENSE\r\n\r\n".to_string()).await;
    assert_eq!(response.line.status_code, 400);
    assert_eq!(proxy.status().request_count, 0);
    proxy.stop().await;
}

#[tokio::test]
async fn oversized_chunk_size_gets_bad_request_and_proxy_keeps_serving() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    let mut events = proxy.subscribe();
    let port = proxy.start(Some(0)).await.unwrap();
    let (origin, _seen) = start_origin(
        b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nok".to_vec(),
    )
    .await;

    let response = send_through(
        port,
        format!(
            "POST http://{origin}/upload HTTP/1.1\r\nHost: {origin}\r\nTransfer-Encoding: chunked\r\n\r\nffffffffffffffff\r\nab\r\n"
        ),
    )
    .await;
    assert_eq!(response.line.status_code, 400);
    assert_eq!(proxy.status().request_count, 0);
    assert!(proxy.is_running());

    let response = send_through(
        port,
        format!("GET http://{origin}/ HTTP/1.1\r\nHost: {origin}\r\nConnection: close\r\n\r\n"),
    )
    .await;
    assert_eq!(response.line.status_code, 200);
    let request = assert_matches!(next_event(&mut events).await, ProxyEvent::RequestCaptured(request) => request);
    assert_eq!(request.id, 1);
    assert_eq!(request.path, "/");
    proxy.stop().await;
}

#[tokio::test]
async fn start_is_idempotent_and_stop_releases_the_port() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);
    assert!(!proxy.status().is_running);

    let first = proxy.start(Some(0)).await.unwrap();
    let second = proxy.start(Some(0)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(proxy.port(), first);
    assert!(proxy.status().is_running);
    assert!(dir.path().join("certs").join(tapline_net::CA_CERT_FILE).exists());

    proxy.stop().await;
    assert!(!proxy.status().is_running);
    assert_eq!(proxy.status().port, first);
    assert!(TcpStream::connect(("127.0.0.1", first)).await.is_err());

    proxy.stop().await;
    let restarted = proxy.start(Some(0)).await.unwrap();
    assert!(proxy.is_running());
    assert!(TcpStream::connect(("127.0.0.1", restarted)).await.is_ok());
    proxy.stop().await;
}

#[tokio::test]
async fn start_skips_a_port_in_use() {
    let dir = tempfile::tempdir().unwrap();
    let proxy = test_proxy(&dir);

    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let busy = taken.local_addr().unwrap().port();

    let bound = proxy.start(Some(busy)).await.unwrap();
    assert_ne!(bound, busy);
    assert!(bound > busy);
    assert_eq!(proxy.status().port, bound);
    proxy.stop().await;
}
