use std::borrow::Cow;

use tracing::{debug, warn};

use crate::compress::{brotli_decompress, deflate_decompress, gzip_decompress, zstd_decompress};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
}

impl ContentEncoding {
    /// Picks the codec named by a `Content-Encoding` value. Checked in a
    /// fixed order so `x-gzip` and stacked values still resolve.
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.to_ascii_lowercase();
        if value.contains("gzip") {
            Some(ContentEncoding::Gzip)
        } else if value.contains("deflate") {
            Some(ContentEncoding::Deflate)
        } else if value.contains("br") {
            Some(ContentEncoding::Brotli)
        } else if value.contains("zstd") {
            Some(ContentEncoding::Zstd)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentEncoding::Gzip => "gzip",
            ContentEncoding::Deflate => "deflate",
            ContentEncoding::Brotli => "br",
            ContentEncoding::Zstd => "zstd",
        }
    }
}

/// Undoes `content_encoding` on `input`. Unknown encodings and bodies that
/// fail to decode come back untouched.
pub fn decompress_body<'a>(input: &'a [u8], content_encoding: Option<&str>) -> Cow<'a, [u8]> {
    if input.is_empty() {
        return Cow::Borrowed(input);
    }
    let Some(header) = content_encoding else {
        return Cow::Borrowed(input);
    };
    let Some(encoding) = ContentEncoding::from_header(header) else {
        debug!(encoding = header, "unrecognized content-encoding, passing through");
        return Cow::Borrowed(input);
    };

    let decoded = match encoding {
        ContentEncoding::Gzip => gzip_decompress(input),
        ContentEncoding::Deflate => deflate_decompress(input),
        ContentEncoding::Brotli => brotli_decompress(input),
        ContentEncoding::Zstd => zstd_decompress(input),
    };

    match decoded {
        Ok(bytes) => Cow::Owned(bytes),
        Err(err) => {
            warn!(
                encoding = encoding.as_str(),
                len = input.len(),
                error = %err,
                "failed to decompress body, keeping raw bytes"
            );
            Cow::Borrowed(input)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ContentEncoding;

    #[test]
    fn resolves_encodings_in_priority_order() {
        assert_eq!(ContentEncoding::from_header("GZIP"), Some(ContentEncoding::Gzip));
        assert_eq!(ContentEncoding::from_header("x-gzip"), Some(ContentEncoding::Gzip));
        assert_eq!(ContentEncoding::from_header("deflate"), Some(ContentEncoding::Deflate));
        assert_eq!(ContentEncoding::from_header("br"), Some(ContentEncoding::Brotli));
        assert_eq!(ContentEncoding::from_header("zstd"), Some(ContentEncoding::Zstd));
        assert_eq!(ContentEncoding::from_header("identity"), None);
        assert_eq!(ContentEncoding::from_header(""), None);
    }
}
