use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};

use openssl::ssl::SslConnector;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tapline_net::{CaInfo, CertificateAuthority, RequestParser, build_connector};

use crate::capture::ProxyStatus;
use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::events::{EventSink, ProxyEvents};
use crate::exchange::{BAD_REQUEST, read_request, serve_exchange};
use crate::target::Target;
use crate::tunnel::handle_connect;

/// Local intercepting forward proxy. Construct once and share; `start` and
/// `stop` may be called repeatedly.
pub struct ProxyServer {
    state: Arc<ProxyState>,
    listener: Mutex<Option<ListenerTask>>,
    running: AtomicBool,
    port: AtomicU16,
}

pub(crate) struct ProxyState {
    pub(crate) config: ProxyConfig,
    pub(crate) authority: Arc<CertificateAuthority>,
    pub(crate) events: EventSink,
    pub(crate) connector: SslConnector,
    request_counter: AtomicU64,
}

struct ListenerTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl ProxyState {
    pub(crate) fn next_request_id(&self) -> u64 {
        self.request_counter.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn request_count(&self) -> u64 {
        self.request_counter.load(Ordering::SeqCst)
    }
}

impl ProxyServer {
    pub fn new(config: ProxyConfig, authority: Arc<CertificateAuthority>) -> Result<Self, ProxyError> {
        config.validate()?;
        let connector = build_connector()?;
        let events = EventSink::new(config.events.capacity);
        let port = config.listen.port;
        Ok(Self {
            state: Arc::new(ProxyState {
                config,
                authority,
                events,
                connector,
                request_counter: AtomicU64::new(0),
            }),
            listener: Mutex::new(None),
            running: AtomicBool::new(false),
            port: AtomicU16::new(port),
        })
    }

    /// Builds the certificate authority described by `config`.
    pub fn from_config(config: ProxyConfig) -> Result<Self, ProxyError> {
        let authority = Arc::new(config.authority()?);
        Self::new(config, authority)
    }

    pub fn subscribe(&self) -> ProxyEvents {
        self.state.events.subscribe()
    }

    pub fn authority(&self) -> &Arc<CertificateAuthority> {
        &self.state.authority
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.state.config
    }

    /// Initializes the root certificate and starts listening. `port`
    /// overrides the configured port; ports in use are skipped upwards up to
    /// `listen.max_port_attempts` times. Returns the bound port, or the
    /// current one if already running.
    pub async fn start(&self, port: Option<u16>) -> Result<u16, ProxyError> {
        let mut listener_slot = self.listener.lock().await;
        if listener_slot.is_some() {
            let port = self.port();
            debug!(port, "proxy already running");
            return Ok(port);
        }

        let ca = self.initialize_authority().await?;
        info!(path = %ca.cert_path.display(), "root certificate ready");

        let listen = &self.state.config.listen;
        let requested = port.unwrap_or(listen.port);
        let listener = bind_with_retry(&listen.host, requested, listen.max_port_attempts).await?;
        let bound = listener.local_addr()?.port();

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(accept_loop(
            Arc::clone(&self.state),
            listener,
            shutdown_rx,
        ));
        *listener_slot = Some(ListenerTask { shutdown, handle });
        self.port.store(bound, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);

        info!(host = %listen.host, port = bound, "proxy listening");
        Ok(bound)
    }

    /// Stops accepting connections. In-flight connections finish on their own.
    pub async fn stop(&self) {
        let task = self.listener.lock().await.take();
        let Some(task) = task else {
            return;
        };
        let _ = task.shutdown.send(());
        if let Err(err) = task.handle.await {
            warn!(error = %err, "proxy listener task failed");
        }
        self.running.store(false, Ordering::SeqCst);
        info!(port = self.port(), "proxy stopped");
    }

    pub fn status(&self) -> ProxyStatus {
        ProxyStatus {
            is_running: self.is_running(),
            port: self.port(),
            request_count: self.state.request_count(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Last bound port, or the configured one before the first start.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// Replaces the root certificate; leaves issued from the old root are
    /// dropped and re-issued on demand.
    pub async fn regenerate_ca(&self) -> Result<CaInfo, ProxyError> {
        let authority = Arc::clone(&self.state.authority);
        let info = tokio::task::spawn_blocking(move || authority.regenerate())
            .await
            .map_err(|err| ProxyError::Runtime(err.to_string()))??;
        Ok(info)
    }

    async fn initialize_authority(&self) -> Result<CaInfo, ProxyError> {
        let authority = Arc::clone(&self.state.authority);
        let info = tokio::task::spawn_blocking(move || authority.initialize())
            .await
            .map_err(|err| ProxyError::Runtime(err.to_string()))??;
        Ok(info)
    }
}

async fn bind_with_retry(host: &str, first: u16, attempts: u16) -> Result<TcpListener, ProxyError> {
    let attempts = attempts.max(1);
    for offset in 0..attempts {
        let Some(port) = first.checked_add(offset) else {
            break;
        };
        match TcpListener::bind((host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(err) if err.kind() == io::ErrorKind::AddrInUse && port != 0 => {
                warn!(port, "port in use, trying the next one");
            }
            Err(err) => return Err(ProxyError::Io(err)),
        }
    }
    Err(ProxyError::Bind {
        host: host.to_string(),
        port: first,
        attempts,
    })
}

async fn accept_loop(
    state: Arc<ProxyState>,
    listener: TcpListener,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(state, stream).await {
                            debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => warn!(error = %err, "accept failed"),
            },
        }
    }
    debug!("proxy accept loop exited");
}

async fn handle_connection(state: Arc<ProxyState>, mut stream: TcpStream) -> Result<(), ProxyError> {
    let _ = stream.set_nodelay(true);
    let mut parser = RequestParser::new();
    loop {
        let (request, arrival) = match read_request(&mut stream, &mut parser).await {
            Ok(Some(incoming)) => incoming,
            Ok(None) => return Ok(()),
            Err(err @ ProxyError::Parse(_)) => {
                let _ = stream.write_all(BAD_REQUEST).await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        if request.line.method.eq_ignore_ascii_case("CONNECT") {
            let head = parser.take_buffered();
            return handle_connect(state, stream, &request.line.target, head).await;
        }

        let Some(target) = Target::plain(&request) else {
            stream.write_all(BAD_REQUEST).await?;
            return Err(ProxyError::Parse(format!(
                "cannot resolve target {}",
                request.line.target
            )));
        };
        let keep_alive = request.keep_alive();
        serve_exchange(&state, &mut stream, request, arrival, target).await?;
        if !keep_alive {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::net::TcpListener;

    use super::bind_with_retry;
    use crate::error::ProxyError;

    #[tokio::test]
    async fn bind_skips_ports_in_use() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        match bind_with_retry("127.0.0.1", port, 10).await {
            Ok(listener) => assert_ne!(listener.local_addr().unwrap().port(), port),
            // The next port can itself be taken on a busy host.
            Err(err) => assert_matches!(err, ProxyError::Bind { .. }),
        }
    }

    #[tokio::test]
    async fn bind_gives_up_after_attempts() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = bind_with_retry("127.0.0.1", port, 1).await.unwrap_err();
        assert_matches!(err, ProxyError::Bind { attempts: 1, .. });
    }
}
