use tapline_codec::{base64_encode_bytes, decompress_body};
use tracing::debug;

use crate::capture::{BinaryBody, BinaryEncoding, BinaryKind, ResponseBody};

const BINARY_CONTENT_TYPES: &[&str] = &[
    "image/",
    "audio/",
    "video/",
    "application/octet-stream",
    "application/pdf",
    "application/zip",
];

pub fn is_binary_content_type(content_type: &str) -> bool {
    BINARY_CONTENT_TYPES
        .iter()
        .any(|family| content_type.contains(family))
}

/// Renders a raw upstream body for capture. The body is decoded according
/// to `content_encoding` first; binary families become a base64 descriptor
/// and everything else is text.
pub fn parse_response_body(
    body: &[u8],
    content_type: Option<&str>,
    content_encoding: Option<&str>,
) -> ResponseBody {
    if body.is_empty() {
        return ResponseBody::Text(String::new());
    }

    let decoded = decompress_body(body, content_encoding);
    match content_type {
        Some(content_type) if is_binary_content_type(content_type) => {
            ResponseBody::Binary(BinaryBody {
                kind: BinaryKind::Binary,
                encoding: BinaryEncoding::Base64,
                data: base64_encode_bytes(&decoded),
                mime_type: content_type.to_string(),
            })
        }
        _ => ResponseBody::Text(decode_text(decoded.into_owned())),
    }
}

fn decode_text(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug!("body is not valid UTF-8, decoding as Latin-1");
            err.into_bytes().into_iter().map(char::from).collect()
        }
    }
}
