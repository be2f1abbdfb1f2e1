//! Cryptographic utilities for webhook verification.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Default maximum webhook payload size (1MB).
pub const DEFAULT_MAX_WEBHOOK_SIZE: usize = 1024 * 1024;

/// Computes SHA-256 hash of data and returns as hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    let hash = sha2::Sha256::digest(data);
    hex::encode(hash)
}

/// Computes HMAC-SHA256 of data with the given key and returns it base64 encoded.
pub fn hmac_sha256_base64(key: &[u8], data: &[u8]) -> String {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    STANDARD.encode(mac.finalize().into_bytes())
}

/// Verifies a base64 HMAC-SHA256 signature using constant-time comparison.
///
/// Empty bodies, signatures and secrets never verify.
pub fn verify_hmac_base64(secret: &str, signature: &str, body: &[u8]) -> bool {
    if secret.is_empty() || signature.is_empty() || body.is_empty() {
        return false;
    }

    let computed = hmac_sha256_base64(secret.as_bytes(), body);
    constant_time_eq(signature.as_bytes(), computed.as_bytes())
}

/// Constant-time equality comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
