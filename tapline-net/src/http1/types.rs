#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
    pub raw_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: String,
    pub target: String,
    pub version: HttpVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub version: HttpVersion,
    pub status_code: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpVersion {
    Http10,
    Http11,
    Other(String),
}

impl HttpVersion {
    pub fn as_str(&self) -> &str {
        match self {
            HttpVersion::Http10 => "HTTP/1.0",
            HttpVersion::Http11 => "HTTP/1.1",
            HttpVersion::Other(other) => other.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub line: RequestLine,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the client expects the connection to stay open after this
    /// exchange.
    pub fn keep_alive(&self) -> bool {
        let connection = self.header("connection").map(str::to_ascii_lowercase);
        match self.line.version {
            HttpVersion::Http10 => connection.is_some_and(|value| value.contains("keep-alive")),
            _ => !connection.is_some_and(|value| value.contains("close")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub line: StatusLine,
    pub headers: Vec<Header>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_header_bytes: usize,
    pub max_body_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    InvalidStartLine,
    InvalidStatusLine,
    InvalidHeader,
    HeaderTooLarge,
    InvalidContentLength,
    BodyTooLarge,
    InvalidChunkSize,
    InvalidChunkTerminator,
    UnexpectedEof,
}

#[cfg(test)]
mod tests {
    use super::{Header, HttpVersion, Request, RequestLine};

    fn request(version: HttpVersion, connection: Option<&str>) -> Request {
        Request {
            line: RequestLine {
                method: "GET".to_string(),
                target: "/".to_string(),
                version,
            },
            headers: connection
                .map(|value| Header {
                    name: "Connection".to_string(),
                    value: value.to_string(),
                    raw_name: "Connection".to_string(),
                })
                .into_iter()
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn keep_alive_follows_version_defaults() {
        assert!(request(HttpVersion::Http11, None).keep_alive());
        assert!(!request(HttpVersion::Http11, Some("close")).keep_alive());
        assert!(!request(HttpVersion::Http10, None).keep_alive());
        assert!(request(HttpVersion::Http10, Some("Keep-Alive")).keep_alive());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let request = request(HttpVersion::Http11, Some("close"));
        assert_eq!(request.header("CONNECTION"), Some("close"));
        assert_eq!(request.header("host"), None);
    }
}
