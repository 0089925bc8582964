//! Token generation and comparison.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Generate a URL-safe token from `bytes` bytes of OS randomness.
pub fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(&buf)
}

/// Compare a provided token against the stored one in constant time.
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    // Length is not secret for fixed-size tokens.
    if provided.len() != expected.len() {
        return false;
    }
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}
