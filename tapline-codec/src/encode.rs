use base64::Engine;

use crate::CodecError;

pub fn base64_encode_bytes(input: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(input)
}

pub fn base64_decode_bytes(input: &[u8]) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(input)
        .map_err(|err| CodecError::Base64(err.to_string()))
}
