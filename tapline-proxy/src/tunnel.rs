use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;

use openssl::ssl::{Ssl, SslAcceptor};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_openssl::SslStream;
use tracing::{debug, info, warn};

use tapline_net::{RequestParser, build_acceptor};

use crate::error::ProxyError;
use crate::exchange::{read_request, serve_exchange};
use crate::proxy::ProxyState;
use crate::target::{Target, split_host_port};

const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const TUNNEL_FAILED: &[u8] =
    b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// Intercepts a CONNECT tunnel: the client's TLS is terminated by a
/// listener bound to loopback for the lifetime of this tunnel, using a leaf
/// certificate for the requested host. `head` holds bytes the client sent
/// after the CONNECT request.
pub(crate) async fn handle_connect(
    state: Arc<ProxyState>,
    mut client: TcpStream,
    target: &str,
    head: Vec<u8>,
) -> Result<(), ProxyError> {
    let (host, port) = split_host_port(target, 443);
    info!(host = %host, port, "CONNECT");

    let (listener, acceptor) = match prepare_interception(&state, &host).await {
        Ok(prepared) => prepared,
        Err(err) => {
            warn!(host = %host, error = %err, "cannot intercept tunnel");
            let _ = client.write_all(TUNNEL_FAILED).await;
            let _ = client.shutdown().await;
            return Err(err);
        }
    };
    let local_addr = listener.local_addr()?;

    let (shutdown, shutdown_rx) = oneshot::channel();
    let ephemeral = tokio::spawn(serve_ephemeral(
        Arc::clone(&state),
        listener,
        acceptor,
        host.clone(),
        port,
        shutdown_rx,
    ));
    debug!(host = %host, %local_addr, "ephemeral TLS listener started");

    let result = pipe(&mut client, local_addr, &head).await;

    let _ = shutdown.send(());
    if let Err(err) = ephemeral.await {
        warn!(host = %host, error = %err, "ephemeral TLS listener failed");
    }
    debug!(host = %host, "ephemeral TLS listener closed");
    result
}

async fn prepare_interception(
    state: &ProxyState,
    host: &str,
) -> Result<(TcpListener, SslAcceptor), ProxyError> {
    let authority = Arc::clone(&state.authority);
    let leaf_host = host.to_string();
    let leaf = tokio::task::spawn_blocking(move || authority.generate_domain_cert(&leaf_host))
        .await
        .map_err(|err| ProxyError::Runtime(err.to_string()))??;
    let chain = state.authority.root_pem();
    let acceptor = build_acceptor(&leaf, chain.as_deref().map(str::as_bytes))?;
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    Ok((listener, acceptor))
}

async fn pipe(
    client: &mut TcpStream,
    local_addr: SocketAddr,
    head: &[u8],
) -> Result<(), ProxyError> {
    client.write_all(CONNECTION_ESTABLISHED).await?;
    let mut local = TcpStream::connect(local_addr).await?;
    let _ = local.set_nodelay(true);
    if !head.is_empty() {
        local.write_all(head).await?;
    }
    let (sent, received) = tokio::io::copy_bidirectional(client, &mut local).await?;
    debug!(sent, received, "tunnel closed");
    Ok(())
}

async fn serve_ephemeral(
    state: Arc<ProxyState>,
    listener: TcpListener,
    acceptor: SslAcceptor,
    host: String,
    port: u16,
    mut shutdown: oneshot::Receiver<()>,
) {
    let acceptor = Arc::new(acceptor);
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    connections.spawn(serve_tls_connection(
                        Arc::clone(&state),
                        Arc::clone(&acceptor),
                        stream,
                        host.clone(),
                        port,
                    ));
                }
                Err(err) => {
                    warn!(host = %host, error = %err, "ephemeral accept failed");
                    break;
                }
            },
        }
    }
    drop(listener);

    while let Some(joined) = connections.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(host = %host, error = %err, "intercepted connection ended"),
            Err(err) => warn!(host = %host, error = %err, "intercepted connection task failed"),
        }
    }
}

async fn serve_tls_connection(
    state: Arc<ProxyState>,
    acceptor: Arc<SslAcceptor>,
    stream: TcpStream,
    host: String,
    port: u16,
) -> Result<(), ProxyError> {
    let ssl = Ssl::new(acceptor.context()).map_err(|err| ProxyError::Runtime(err.to_string()))?;
    let mut tls =
        SslStream::new(ssl, stream).map_err(|err| ProxyError::Runtime(err.to_string()))?;
    Pin::new(&mut tls)
        .accept()
        .await
        .map_err(|err| ProxyError::Runtime(format!("TLS handshake for {host}: {err}")))?;

    let mut parser = RequestParser::new();
    while let Some((request, arrival)) = read_request(&mut tls, &mut parser).await? {
        let keep_alive = request.keep_alive();
        let target = Target::https(&host, port, &request.line.target);
        serve_exchange(&state, &mut tls, request, arrival, target).await?;
        if !keep_alive {
            break;
        }
    }
    let _ = tls.shutdown().await;
    Ok(())
}
