use tapline_net::TlsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy configuration error: {0}")]
    Config(String),
    #[error("no free port on {host} after {attempts} attempts starting at {port}")]
    Bind { host: String, port: u16, attempts: u16 },
    #[error("certificate error: {0}")]
    Tls(#[from] TlsError),
    #[error("upstream error: {0}")]
    Upstream(String),
    #[error("malformed request: {0}")]
    Parse(String),
    #[error("proxy runtime error: {0}")]
    Runtime(String),
    #[error("proxy IO error: {0}")]
    Io(#[from] std::io::Error),
}
