mod body;
mod capture;
mod config;
mod error;
mod events;
mod exchange;
mod forward;
mod proxy;
mod source;
mod target;
mod tunnel;

pub use body::{is_binary_content_type, parse_response_body};
pub use capture::{
    BinaryBody, BinaryEncoding, BinaryKind, HeaderEntry, InterceptedRequest, InterceptedResponse,
    Protocol, ProxyStatus, ResponseBody,
};
pub use config::{DEFAULT_PORT, EventsConfig, ListenConfig, ProxyConfig, TlsMitmConfig};
pub use error::ProxyError;
pub use events::{ProxyEvent, ProxyEvents};
pub use proxy::ProxyServer;
pub use source::{ClientSource, detect_source};
pub use tapline_codec::decompress_body;
