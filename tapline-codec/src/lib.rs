mod compress;
mod content;
mod encode;
mod error;

pub use compress::{
    brotli_compress, brotli_decompress, deflate_compress, deflate_decompress, gzip_compress,
    gzip_decompress, zstd_compress, zstd_decompress,
};
pub use content::{ContentEncoding, decompress_body};
pub use encode::{base64_decode_bytes, base64_encode_bytes};
pub use error::CodecError;
