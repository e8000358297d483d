use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{GzEncoder, ZlibEncoder};

use crate::CodecError;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 5;
const BROTLI_WINDOW: u32 = 22;
const ZSTD_LEVEL: i32 = 3;

pub fn gzip_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(input)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| CodecError::Compression(err.to_string()))
}

pub fn gzip_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    read_all(GzDecoder::new(input))
}

/// HTTP `deflate` is the zlib container.
pub fn deflate_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(input)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| CodecError::Compression(err.to_string()))
}

/// Accepts zlib-wrapped data and, as some servers send it, a bare deflate
/// stream.
pub fn deflate_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    read_all(ZlibDecoder::new(input)).or_else(|_| read_all(DeflateDecoder::new(input)))
}

pub fn brotli_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut encoder = brotli::CompressorWriter::new(
        Vec::new(),
        BROTLI_BUFFER_SIZE,
        BROTLI_QUALITY,
        BROTLI_WINDOW,
    );
    encoder
        .write_all(input)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    Ok(encoder.into_inner())
}

pub fn brotli_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    read_all(brotli::Decompressor::new(input, BROTLI_BUFFER_SIZE))
}

pub fn zstd_compress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    zstd::stream::encode_all(input, ZSTD_LEVEL)
        .map_err(|err| CodecError::Compression(err.to_string()))
}

pub fn zstd_decompress(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    let decoder = zstd::stream::read::Decoder::new(input)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    read_all(decoder)
}

fn read_all(mut decoder: impl Read) -> Result<Vec<u8>, CodecError> {
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|err| CodecError::Compression(err.to_string()))?;
    Ok(output)
}
