use std::net::IpAddr;

use tapline_net::Request;

use crate::capture::Protocol;

/// Where a captured request is forwarded, and how it is reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub(crate) protocol: Protocol,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) path: String,
    pub(crate) url: String,
}

impl Target {
    /// A request read inside an intercepted tunnel to `host:port`.
    pub(crate) fn https(host: &str, port: u16, request_target: &str) -> Self {
        let path = match url::Url::parse(request_target) {
            Ok(parsed) if parsed.has_host() => path_and_query(&parsed),
            _ => request_target.to_string(),
        };
        let url = format!(
            "https://{}{}",
            authority(host, port, Protocol::Https),
            path
        );
        Self {
            protocol: Protocol::Https,
            host: host.to_string(),
            port,
            path,
            url,
        }
    }

    /// A request sent to the plain listener, in absolute or origin form.
    pub(crate) fn plain(request: &Request) -> Option<Self> {
        let request_target = request.line.target.as_str();
        if let Some(target) = absolute(request_target) {
            return Some(target);
        }
        if !request_target.starts_with('/') && request_target != "*" {
            return None;
        }

        let host_header = request.header("host")?.trim();
        if host_header.is_empty() {
            return None;
        }
        let (host, port) = split_host_port(host_header, Protocol::Http.default_port());
        Some(Self {
            protocol: Protocol::Http,
            host,
            port,
            path: request_target.to_string(),
            url: format!("http://{host_header}{request_target}"),
        })
    }

    pub(crate) fn authority(&self) -> String {
        authority(&self.host, self.port, self.protocol)
    }
}

fn absolute(request_target: &str) -> Option<Target> {
    let lowered = request_target.get(..8)?.to_ascii_lowercase();
    let protocol = if lowered.starts_with("http://") {
        Protocol::Http
    } else if lowered.starts_with("https://") {
        Protocol::Https
    } else {
        return None;
    };

    let parsed = url::Url::parse(request_target).ok()?;
    let host = match parsed.host()? {
        url::Host::Ipv6(addr) => addr.to_string(),
        other => other.to_string(),
    };
    let port = parsed
        .port_or_known_default()
        .unwrap_or(protocol.default_port());
    Some(Target {
        protocol,
        host,
        port,
        path: path_and_query(&parsed),
        url: request_target.to_string(),
    })
}

fn path_and_query(url: &url::Url) -> String {
    let mut path = url.path().to_string();
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }
    path
}

/// `host[:port]` with IPv6 literals bracketed and the default port omitted.
pub(crate) fn authority(host: &str, port: u16, protocol: Protocol) -> String {
    let host = if host.parse::<std::net::Ipv6Addr>().is_ok() {
        format!("[{host}]")
    } else {
        host.to_string()
    };
    if port == protocol.default_port() {
        host
    } else {
        format!("{host}:{port}")
    }
}

/// Splits `host:port`, `[v6]:port`, `[v6]` or a bare host. The returned
/// host never carries brackets.
pub(crate) fn split_host_port(value: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = value.strip_prefix('[') {
        if let Some((host, after)) = rest.split_once(']') {
            let port = after
                .strip_prefix(':')
                .and_then(|port| port.parse::<u16>().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    if value.parse::<IpAddr>().is_ok() {
        return (value.to_string(), default_port);
    }
    if let Some((host, port)) = value.rsplit_once(':') {
        if let Ok(port) = port.parse::<u16>() {
            return (host.to_string(), port);
        }
    }
    (value.to_string(), default_port)
}

#[cfg(test)]
mod tests {
    use tapline_net::{Header, HttpVersion, Request, RequestLine};

    use super::{Target, authority, split_host_port};
    use crate::capture::Protocol;

    fn request(target: &str, host: Option<&str>) -> Request {
        Request {
            line: RequestLine {
                method: "GET".to_string(),
                target: target.to_string(),
                version: HttpVersion::Http11,
            },
            headers: host
                .map(|host| Header {
                    name: "host".to_string(),
                    value: host.to_string(),
                    raw_name: "Host".to_string(),
                })
                .into_iter()
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn splits_host_and_port() {
        assert_eq!(split_host_port("example.com:8443", 443), ("example.com".to_string(), 8443));
        assert_eq!(split_host_port("example.com", 443), ("example.com".to_string(), 443));
        assert_eq!(split_host_port("[::1]:8443", 443), ("::1".to_string(), 8443));
        assert_eq!(split_host_port("[::1]", 80), ("::1".to_string(), 80));
        assert_eq!(split_host_port("::1", 80), ("::1".to_string(), 80));
        assert_eq!(split_host_port("example.com:http", 80), ("example.com:http".to_string(), 80));
    }

    #[test]
    fn absolute_form_uses_the_url() {
        let target = Target::plain(&request("http://example.com:8080/a/b?q=1", None)).unwrap();
        assert_eq!(target.protocol, Protocol::Http);
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 8080);
        assert_eq!(target.path, "/a/b?q=1");
        assert_eq!(target.url, "http://example.com:8080/a/b?q=1");
    }

    #[test]
    fn absolute_form_defaults_port_and_path() {
        let target = Target::plain(&request("http://example.com", None)).unwrap();
        assert_eq!(target.port, 80);
        assert_eq!(target.path, "/");

        let target = Target::plain(&request("http://[::1]:9000/x", None)).unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 9000);
    }

    #[test]
    fn origin_form_uses_host_header() {
        let target = Target::plain(&request("/status", Some("127.0.0.1:3000"))).unwrap();
        assert_eq!(target.host, "127.0.0.1");
        assert_eq!(target.port, 3000);
        assert_eq!(target.url, "http://127.0.0.1:3000/status");

        assert!(Target::plain(&request("/status", None)).is_none());
        assert!(Target::plain(&request("ftp://example.com/", Some("example.com"))).is_none());
    }

    #[test]
    fn https_url_omits_default_port() {
        let target = Target::https("example.com", 443, "/a?b=c");
        assert_eq!(target.url, "https://example.com/a?b=c");
        assert_eq!(target.path, "/a?b=c");

        let target = Target::https("::1", 8443, "/");
        assert_eq!(target.url, "https://[::1]:8443/");
        assert_eq!(target.authority(), "[::1]:8443");
    }

    #[test]
    fn https_accepts_absolute_targets() {
        let target = Target::https("example.com", 443, "https://example.com/x?y=1");
        assert_eq!(target.path, "/x?y=1");
    }

    #[test]
    fn authority_brackets_ipv6() {
        assert_eq!(authority("::1", 80, Protocol::Http), "[::1]");
        assert_eq!(authority("example.com", 8080, Protocol::Http), "example.com:8080");
    }
}
