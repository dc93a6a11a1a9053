//! # Outbound Payload Signing
//!
//! HMAC-SHA256 signatures over delivered payloads so receivers can
//! authenticate the sender. The signed message is `"{timestamp}.{body}"`,
//! which binds the signature to the delivery time and lets receivers reject
//! replayed requests.
//!
//! The relay itself never interprets webhook metadata; the HTTP executor
//! recognizes a `"secret"` entry and calls into this module.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC-SHA256 signature.
pub const SIGNATURE_HEADER: &str = "X-Relay-Signature";

/// Header carrying the Unix-seconds timestamp the signature covers.
pub const TIMESTAMP_HEADER: &str = "X-Relay-Timestamp";

/// Compute the hex-encoded signature for a delivery.
///
/// # Examples
///
/// ```rust
/// use hook_relay_core::signature::{compute_signature, verify_signature};
///
/// let sig = compute_signature(b"s3cret", "1700000000", b"{\"type\":\"order.created\"}");
/// assert!(verify_signature(b"s3cret", "1700000000", b"{\"type\":\"order.created\"}", &sig));
/// ```
pub fn compute_signature(secret: &[u8], timestamp: &str, payload: &[u8]) -> String {
    let mut mac = new_mac(secret);
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a received signature in constant time.
pub fn verify_signature(secret: &[u8], timestamp: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = new_mac(secret);
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

fn new_mac(secret: &[u8]) -> HmacSha256 {
    // HMAC-SHA256 accepts keys of any length, so construction cannot fail.
    HmacSha256::new_from_slice(secret)
        .unwrap_or_else(|_| HmacSha256::new_from_slice(b"hook-relay").expect("hmac"))
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
