use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tapline_net::Header;

use crate::source::ClientSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Protocol::Http => 80,
            Protocol::Https => 443,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
}

impl HeaderEntry {
    pub(crate) fn from_headers(headers: &[Header]) -> Vec<Self> {
        headers
            .iter()
            .map(|header| Self {
                name: header.raw_name.clone(),
                value: header.value.clone(),
            })
            .collect()
    }
}

/// A client request as it was received, before any upstream rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedRequest {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub protocol: Protocol,
    pub host: String,
    pub path: String,
    pub headers: Vec<HeaderEntry>,
    pub body: String,
    pub source: ClientSource,
}

impl InterceptedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterceptedResponse {
    pub id: u64,
    pub status_code: u16,
    pub status_message: String,
    pub headers: Vec<HeaderEntry>,
    pub body: ResponseBody,
    /// Length of the body as received, before content decoding.
    pub size: usize,
    /// Milliseconds from request receipt to response completion.
    #[serde(rename = "duration")]
    pub duration_ms: u64,
}

impl InterceptedResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Text(String),
    Binary(BinaryBody),
}

impl ResponseBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            ResponseBody::Binary(_) => None,
        }
    }
}

/// Descriptor for bodies that are not rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BinaryBody {
    #[serde(rename = "type")]
    pub kind: BinaryKind,
    pub encoding: BinaryEncoding,
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryKind {
    Binary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryEncoding {
    Base64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyStatus {
    pub is_running: bool,
    pub port: u16,
    pub request_count: u64,
}

fn find_header<'a>(headers: &'a [HeaderEntry], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|header| header.name.eq_ignore_ascii_case(name))
        .map(|header| header.value.as_str())
}
