//! Base64 helpers shared by the fetcher, decoder and writers

use base64::engine::general_purpose::STANDARD;
use base64::{DecodeError, Engine};

/// Decode standard base64, tolerating line breaks and missing `=` padding
pub fn decode_padded(input: &str) -> Result<Vec<u8>, DecodeError> {
    let mut compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let remainder = compact.len() % 4;
    if remainder != 0 {
        compact.extend(std::iter::repeat('=').take(4 - remainder));
    }
    STANDARD.decode(compact)
}

/// Decode padded base64 into text, replacing invalid UTF-8
pub fn decode_padded_text(input: &str) -> Result<String, DecodeError> {
    decode_padded(input).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Encode bytes as standard, padded base64
pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    STANDARD.encode(bytes)
}
