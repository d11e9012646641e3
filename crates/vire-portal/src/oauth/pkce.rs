//! PKCE (Proof Key for Code Exchange) verification and constant-time comparison.
//!
//! Implements S256 code challenge verification per RFC 7636. Every
//! cryptographic comparison here (PKCE challenge, client secret) runs in
//! constant time so a timing side channel cannot distinguish "close" from
//! "wrong" guesses. Hand-rolled (no constant-time-compare crate is in the
//! dependency stack), in the same spirit as the other small, self-contained
//! utilities elsewhere in this crate (`url_encode`, `html_escape`).

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Constant-time byte comparison: always walks the full length of `a`, XOR-ing
/// and accumulating, so total execution time does not depend on *where* the
/// first mismatch occurs.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Verify a PKCE S256 code challenge.
///
/// Computes `BASE64URL(SHA256(code_verifier))` and compares to the stored
/// challenge using [`constant_time_eq`].
#[must_use]
pub fn verify_s256(code_verifier: &str, code_challenge: &str) -> bool {
    let hash = Sha256::digest(code_verifier.as_bytes());
    let computed = URL_SAFE_NO_PAD.encode(hash);
    constant_time_eq(&computed, code_challenge)
}
