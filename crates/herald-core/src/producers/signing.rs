//! HMAC signatures over raw webhook bodies.
//!
//! Signatures travel as lowercase hex, optionally prefixed with the
//! algorithm (`sha256=...`, GitHub style). Verification uses
//! `Mac::verify_slice`, which compares in constant time.

use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};

use crate::domain::SignatureAlgorithm;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

/// Hex HMAC of `body` under `secret`, without prefix.
pub fn compute_signature(algorithm: SignatureAlgorithm, secret: &[u8], body: &[u8]) -> String {
    match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            // HMAC accepts keys of any length.
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                return String::new();
            };
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        SignatureAlgorithm::HmacSha512 => {
            let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
                return String::new();
            };
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
    }
}

/// Verify a received signature header value.
pub fn verify_signature(
    algorithm: SignatureAlgorithm,
    secret: &[u8],
    body: &[u8],
    provided: &str,
) -> bool {
    let provided = provided.trim();
    let provided = provided
        .strip_prefix(algorithm.header_prefix())
        .unwrap_or(provided);
    let Ok(signature) = hex::decode(provided) else {
        return false;
    };

    match algorithm {
        SignatureAlgorithm::HmacSha256 => {
            let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(&signature).is_ok()
        }
        SignatureAlgorithm::HmacSha512 => {
            let Ok(mut mac) = HmacSha512::new_from_slice(secret) else {
                return false;
            };
            mac.update(body);
            mac.verify_slice(&signature).is_ok()
        }
    }
}
